/// Container runtime boundary
///
/// Every interaction with the container runtime goes through external command
/// invocations of its CLI client. `ContainerRuntime` is the seam the engine and
/// service manager depend on; `DockerCli` is the production implementation.

use crate::error::SizerError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Host directory mounted into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
}

/// Everything needed to start one detached container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    /// Arguments appended after the image
    pub args: Vec<String>,
    /// Environment variables, in the order they are passed
    pub env: Vec<(String, String)>,
    pub mounts: Vec<VolumeMount>,
    /// Ports published on the host as `port:port`
    pub ports: Vec<u16>,
    /// Number of GPUs to expose, if any
    pub gpus: Option<u32>,
}

impl LaunchSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Command that starts `spec` detached and prints the container id on stdout.
    /// The launcher owns the resulting process.
    fn detached_run_command(&self, spec: &LaunchSpec) -> Command;

    /// Start `spec` detached and return the container id.
    async fn start_detached(&self, spec: &LaunchSpec) -> Result<String>;

    /// IP address of a running container on its network
    async fn network_address(&self, container: &str) -> Result<String>;

    async fn kill(&self, container: &str) -> Result<()>;

    /// Block until the container exits and return its exit status.
    async fn wait(&self, container: &str) -> Result<i64>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn pull(&self, image: &str) -> Result<()>;
}

/// Runtime backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

#[derive(Debug, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run_args(spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "--rm".to_string()];
        if let Some(gpus) = spec.gpus {
            args.push(format!("--gpus={gpus}"));
        }
        for port in &spec.ports {
            args.push(format!("-p{port}:{port}"));
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", mount.host.display(), mount.container));
        }
        args.push(spec.image.clone());
        args.extend(spec.args.iter().cloned());
        args
    }

    /// Run a client command to completion and return its trimmed stdout.
    async fn capture(&self, args: &[String]) -> Result<String> {
        let rendered = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!("🐳 Running: {}", rendered);

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run `{rendered}`"))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            tracing::debug!("📤 Subprocess returned with stdout {}", stdout);
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(
                "❌ Running `{}` returned {:?} with error {}",
                rendered,
                output.status.code(),
                stderr
            );
            Err(SizerError::Command {
                command: rendered,
                code: output.status.code(),
                stderr,
            }
            .into())
        }
    }
}

/// First non-empty address in `docker inspect` network JSON
fn parse_network_address(json: &str) -> Result<Option<String>> {
    let trimmed = json.trim().trim_matches('\'');
    let networks: HashMap<String, NetworkEndpoint> =
        serde_json::from_str(trimmed).context("unexpected network settings from inspect")?;
    let mut names: Vec<&String> = networks.keys().collect();
    names.sort();
    Ok(names
        .into_iter()
        .map(|name| networks[name].ip_address.as_str())
        .find(|ip| !ip.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn detached_run_command(&self, spec: &LaunchSpec) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(Self::run_args(spec));
        command
    }

    async fn start_detached(&self, spec: &LaunchSpec) -> Result<String> {
        self.capture(&Self::run_args(spec)).await
    }

    async fn network_address(&self, container: &str) -> Result<String> {
        let output = self
            .capture(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{json .NetworkSettings.Networks}}".to_string(),
                container.to_string(),
            ])
            .await?;
        let address = parse_network_address(&output)?.ok_or_else(|| {
            SizerError::config(format!("container {container} has no network address"))
        })?;
        tracing::debug!("🌐 {} can be communicated on address {}", container, address);
        Ok(address)
    }

    async fn kill(&self, container: &str) -> Result<()> {
        self.capture(&["kill".to_string(), container.to_string()])
            .await
            .map(|_| ())
    }

    async fn wait(&self, container: &str) -> Result<i64> {
        let output = self
            .capture(&["wait".to_string(), container.to_string()])
            .await?;
        Ok(output.parse::<i64>().unwrap_or_else(|_| {
            tracing::warn!("⚠️ Unexpected exit status `{}` for {}", output, container);
            1
        }))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self
            .capture(&[
                "images".to_string(),
                image.to_string(),
                "--format".to_string(),
                "{{.Repository}}:{{.Tag}}".to_string(),
            ])
            .await?;
        Ok(output.lines().any(|line| line.trim() == image))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.capture(&["pull".to_string(), image.to_string()])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_args_order_flags_before_image() {
        let spec = LaunchSpec {
            image: "nvcr.io/nvidia/tritonserver:20.07-v1-py3".into(),
            args: vec!["tritonserver".into(), "--load-model=liver".into()],
            env: vec![("A".into(), "1".into())],
            mounts: vec![VolumeMount { host: "/models".into(), container: "/models".into() }],
            ports: vec![8000, 8001],
            gpus: Some(1),
        };
        assert_eq!(
            DockerCli::run_args(&spec),
            vec![
                "run", "-d", "--rm", "--gpus=1", "-p8000:8000", "-p8001:8001", "--env", "A=1",
                "-v", "/models:/models", "nvcr.io/nvidia/tritonserver:20.07-v1-py3",
                "tritonserver", "--load-model=liver",
            ]
        );
    }

    #[test]
    fn network_address_prefers_first_non_empty() {
        let json = r#"'{"bridge":{"IPAddress":"172.17.0.2","Gateway":"172.17.0.1"},"host":{"IPAddress":""}}'"#;
        assert_eq!(parse_network_address(json).unwrap().as_deref(), Some("172.17.0.2"));
        assert_eq!(parse_network_address(r#"{"none":{"IPAddress":""}}"#).unwrap(), None);
    }

    #[test]
    fn env_lookup() {
        let mut spec = LaunchSpec::new("img");
        spec.env.push(("KEY".into(), "value".into()));
        assert_eq!(spec.env_var("KEY"), Some("value"));
        assert_eq!(spec.env_var("MISSING"), None);
    }
}
