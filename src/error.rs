/// Error taxonomy for pipeline sizing runs
///
/// Everything propagates as `anyhow::Error`; these variants are what callers
/// downcast to when they need to tell a policy-driven failure from a fatal one.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SizerError {
    /// Invalid pipeline, models directory or environment. Aborts the run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The container runtime client broke the identifier line contract
    #[error("protocol violation while launching operator `{operator}`: {detail}")]
    Protocol { operator: String, detail: String },

    /// The runtime client exited before handing back a container id
    #[error("operator `{operator}` failed to start (exit code {code:?}):\n{stderr}")]
    LaunchFailed {
        operator: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("timed out after {waited:?} waiting for the container id of operator `{operator}`")]
    IdentifierTimeout { operator: String, waited: Duration },

    #[error("timed out after {waited:?} waiting for inference server at {address} to be ready")]
    ReadinessTimeout { address: String, waited: Duration },

    /// Non-zero final exit status of an operator container
    #[error("operator `{operator}` exited with status {code}")]
    RuntimeFailure { operator: String, code: i64 },

    /// An external command (runtime or compiler) returned non-zero
    #[error("`{command}` returned {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl SizerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True when the operator's container never came up. Only the current
    /// operator fails; the continuation policy decides what happens next.
    /// Non-zero container exits are reported, not raised.
    pub fn is_operator_failure(&self) -> bool {
        matches!(
            self,
            Self::LaunchFailed { .. } | Self::IdentifierTimeout { .. }
        )
    }
}

/// Find the `SizerError` carried somewhere in an `anyhow::Error` chain.
pub fn classify(err: &anyhow::Error) -> Option<&SizerError> {
    err.chain().find_map(|cause| cause.downcast_ref::<SizerError>())
}
