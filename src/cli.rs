/// Command-line surface
///
/// `opsizer <pipeline_path> <input_dir> [--metrics_dir DIR] [--models_dir DIR] [-v] [--force [POLICY]]`

use crate::config::FailurePolicy;
use crate::runtime::RunOptions;
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "opsizer")]
#[command(about = "Pipeline operator sizing tool", long_about = None)]
pub struct Cli {
    /// Pipeline definition file path
    #[arg(value_name = "pipeline_path", value_parser = valid_file)]
    pub pipeline_path: PathBuf,

    /// Input payload directory
    #[arg(value_name = "input_dir", value_parser = valid_dir)]
    pub input_dir: PathBuf,

    /// Metrics output directory; if not specified, metrics are logged as tables
    #[arg(long = "metrics_dir", value_parser = valid_dir)]
    pub metrics_dir: Option<PathBuf>,

    /// Directory of inference models, required if the pipeline uses models
    #[arg(long = "models_dir", value_parser = valid_dir)]
    pub models_dir: Option<PathBuf>,

    /// Verbose output (DEBUG level); the default is INFO
    #[arg(short, long)]
    pub verbose: bool,

    /// Failure policy: prompt (none), continue (cont) or stop; the default prompts on each failure
    #[arg(
        long,
        num_args = 0..=1,
        default_value_t = FailurePolicy::Prompt,
        default_missing_value = "prompt",
        value_parser = clap::value_parser!(FailurePolicy)
    )]
    pub force: FailurePolicy,
}

impl Cli {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            input_dir: self.input_dir.clone(),
            metrics_dir: self.metrics_dir.clone(),
            models_dir: self.models_dir.clone(),
            policy: self.force,
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| format!("cannot resolve '{}': {e}", path.display()))
}

/// Existing file, made absolute
pub fn valid_file(value: &str) -> Result<PathBuf, String> {
    let path = Path::new(value);
    if path.is_file() {
        absolute(path)
    } else {
        Err(format!("No such file or the given path is not a file: '{value}'"))
    }
}

/// Existing directory, made absolute
pub fn valid_dir(value: &str) -> Result<PathBuf, String> {
    let path = Path::new(value);
    if path.is_dir() {
        absolute(path)
    } else {
        Err(format!("No such directory or the given path is not a directory: '{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(dir: &TempDir, extra: &[&str]) -> Result<Cli, clap::Error> {
        let pipeline = dir.path().join("pipeline.yaml");
        std::fs::write(&pipeline, "api-version: 0.4.0\n").unwrap();
        let mut args = vec![
            "opsizer".to_string(),
            pipeline.display().to_string(),
            dir.path().display().to_string(),
        ];
        args.extend(extra.iter().map(|a| a.to_string()));
        Cli::try_parse_from(args)
    }

    #[test]
    fn defaults_to_prompting() {
        let dir = TempDir::new().unwrap();
        let cli = parse(&dir, &[]).unwrap();
        assert_eq!(cli.force, FailurePolicy::Prompt);
        assert!(!cli.verbose);
        assert!(cli.metrics_dir.is_none());
        assert!(cli.pipeline_path.is_absolute());
    }

    #[test]
    fn force_accepts_optional_policy() {
        let dir = TempDir::new().unwrap();
        assert_eq!(parse(&dir, &["--force"]).unwrap().force, FailurePolicy::Prompt);
        assert_eq!(parse(&dir, &["--force", "continue"]).unwrap().force, FailurePolicy::Continue);
        assert_eq!(parse(&dir, &["--force=stop"]).unwrap().force, FailurePolicy::Stop);
        assert!(parse(&dir, &["--force", "maybe"]).is_err());
    }

    #[test]
    fn force_accepts_short_policy_names() {
        let dir = TempDir::new().unwrap();
        assert_eq!(parse(&dir, &["--force", "cont"]).unwrap().force, FailurePolicy::Continue);
        assert_eq!(parse(&dir, &["--force", "none"]).unwrap().force, FailurePolicy::Prompt);
    }

    #[test]
    fn rejects_missing_paths() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(parse(&dir, &["--metrics_dir", &missing.display().to_string()]).is_err());
        assert!(valid_file(&dir.path().display().to_string()).is_err());
        assert!(valid_dir(&dir.path().display().to_string()).is_ok());
    }

    #[test]
    fn options_carry_directories_and_policy() {
        let dir = TempDir::new().unwrap();
        let models = dir.path().display().to_string();
        let cli = parse(&dir, &["-v", "--models_dir", &models, "--force", "stop"]).unwrap();
        let options = cli.run_options();
        assert!(cli.verbose);
        assert_eq!(options.models_dir.as_deref(), Some(dir.path()));
        assert_eq!(options.policy, FailurePolicy::Stop);
    }
}
