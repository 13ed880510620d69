/// Interactive continuation prompt
///
/// Asked after an operator fails when the policy is `prompt`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::{BufRead, Write};

pub const CONTINUE_QUESTION: &str = "Would you like to continue execution at the risk of the rest of pipeline failing (y)? If (n), the run will stop and clean up.";

#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &str) -> Result<bool>;
}

/// Reads y/n answers from the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

/// `Some(true)` for yes, `Some(false)` for no, `None` when the answer should be asked again
pub fn parse_answer(reply: &str) -> Option<bool> {
    match reply.trim().to_ascii_lowercase().chars().next() {
        Some('y') => Some(true),
        Some('n') => Some(false),
        _ => None,
    }
}

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, question: &str) -> Result<bool> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            loop {
                write!(stdout, "{question} (y/n): ")?;
                stdout.flush()?;

                let mut reply = String::new();
                if stdin.lock().read_line(&mut reply)? == 0 {
                    // No terminal to ask; treat end of input as a no
                    return Ok(false);
                }
                if let Some(answer) = parse_answer(&reply) {
                    return Ok(answer);
                }
            }
        })
        .await
        .context("prompt task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_by_first_letter() {
        assert_eq!(parse_answer("y"), Some(true));
        assert_eq!(parse_answer("  Yes please\n"), Some(true));
        assert_eq!(parse_answer("N"), Some(false));
        assert_eq!(parse_answer("nope"), Some(false));
        assert_eq!(parse_answer(""), None);
        assert_eq!(parse_answer("maybe"), None);
    }
}
