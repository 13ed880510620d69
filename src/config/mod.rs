/// Configuration management for opsizer
///
/// Handles container runtime settings, sampling cadence, inference server
/// parameters and the continuation policy applied when an operator fails.

use crate::error::SizerError;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Container runtime configuration
    pub runtime: RuntimeConfig,
    /// Metrics sampling configuration
    pub sampling: SamplingConfig,
    /// Inference server configuration
    pub inference: InferenceConfig,
    /// Pipeline compiler configuration
    pub compiler: CompilerConfig,
}

/// Container runtime client and the host paths it exposes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime client binary (e.g., "docker")
    pub binary: String,
    /// How long to wait for the client to print the container id
    pub id_wait_secs: u64,
    /// Root of the cgroup v1 hierarchy holding per-container accounting files
    pub cgroup_root: PathBuf,
    /// Host-wide CPU time source
    pub proc_stat_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Target sampling period in milliseconds
    pub period_ms: u64,
    /// Interval between checks for the accounting files to appear
    pub existence_poll_ms: u64,
}

/// Inference server (Triton) launch and readiness parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Image used in model-repository mode
    pub image: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub metrics_port: u16,
    /// Fixed warm-up before the first status probe
    pub warmup_secs: u64,
    /// Bounded window for the status probe, also the per-model request timeout
    pub ready_timeout_secs: u64,
    /// Sleep between status probe attempts
    pub retry_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Pipeline compiler binary (e.g., "clarac")
    pub binary: String,
}

impl RuntimeConfig {
    pub fn id_wait(&self) -> Duration {
        Duration::from_secs(self.id_wait_secs)
    }
}

impl SamplingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn existence_poll(&self) -> Duration {
        Duration::from_millis(self.existence_poll_ms)
    }
}

impl InferenceConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR overrides for CI and remote hosts
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig {
                binary: env_or("OPSIZER_RUNTIME", "docker"),
                id_wait_secs: env_parse_or("OPSIZER_ID_WAIT_SECS", 15),
                cgroup_root: env_or("OPSIZER_CGROUP_ROOT", "/sys/fs/cgroup").into(),
                proc_stat_path: env_or("OPSIZER_PROC_STAT", "/proc/stat").into(),
            },
            sampling: SamplingConfig {
                period_ms: env_parse_or("OPSIZER_SAMPLING_PERIOD_MS", 200),
                existence_poll_ms: 5,
            },
            inference: InferenceConfig {
                image: env_or(
                    "OPSIZER_TRITON_IMAGE",
                    "nvcr.io/nvidia/tritonserver:20.07-v1-py3",
                ),
                http_port: 8000,
                grpc_port: 8001,
                metrics_port: 8002,
                warmup_secs: env_parse_or("OPSIZER_TRITON_WARMUP_SECS", 15),
                ready_timeout_secs: env_parse_or("OPSIZER_TRITON_READY_TIMEOUT_SECS", 30),
                retry_interval_secs: 1,
            },
            compiler: CompilerConfig {
                binary: env_or("OPSIZER_COMPILER", "clarac"),
            },
        }
    }
}

/// What to do when an operator finishes with a non-zero exit status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Ask on the terminal whether to keep going
    #[default]
    Prompt,
    /// Move on to the next operator
    Continue,
    /// Finish the current operator, then stop
    Stop,
}

impl FromStr for FailurePolicy {
    type Err = SizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" | "none" => Ok(Self::Prompt),
            "continue" | "cont" => Ok(Self::Continue),
            "stop" => Ok(Self::Stop),
            other => Err(SizerError::config(format!(
                "unknown failure policy `{other}`, expected one of: prompt, continue, stop"
            ))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prompt => "prompt",
            Self::Continue => "continue",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_case_insensitively() {
        assert_eq!("Continue".parse::<FailurePolicy>().unwrap(), FailurePolicy::Continue);
        assert_eq!("STOP".parse::<FailurePolicy>().unwrap(), FailurePolicy::Stop);
        assert_eq!("prompt".parse::<FailurePolicy>().unwrap(), FailurePolicy::Prompt);
        assert_eq!(FailurePolicy::default(), FailurePolicy::Prompt);
    }

    #[test]
    fn failure_policy_rejects_unknown_values() {
        let err = "maybe".parse::<FailurePolicy>().unwrap_err();
        assert!(matches!(err, SizerError::Configuration(_)));
    }

    #[test]
    fn failure_policy_display_round_trips() {
        for policy in [FailurePolicy::Prompt, FailurePolicy::Continue, FailurePolicy::Stop] {
            assert_eq!(policy.to_string().parse::<FailurePolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn default_timings_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.sampling.period(), Duration::from_millis(200));
        assert_eq!(config.inference.http_port, 8000);
        assert_eq!(config.inference.grpc_port, 8001);
        assert_eq!(config.inference.retry_interval(), Duration::from_secs(1));
    }
}
