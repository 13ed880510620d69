/// In-memory container runtime for tests
///
/// Records every call and answers from canned values. Detached runs become
/// real `sh` processes that print a fixed container id, so the launcher is
/// exercised end to end.

use crate::runtime::docker::{ContainerRuntime, LaunchSpec};
use crate::runtime::services::StatusProbe;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;

pub const FAKE_ID: &str = "4f1c2d3e4f1c2d3e4f1c2d3e4f1c2d3e4f1c2d3e4f1c2d3e4f1c2d3e4f1c2d3e";
pub const FAKE_SERVICE_ID: &str = "service-container";
pub const FAKE_ADDRESS: &str = "172.17.0.2";

pub fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[derive(Default)]
pub struct FakeRuntime {
    launch_scripts: Mutex<VecDeque<String>>,
    exit_codes: Mutex<VecDeque<i64>>,
    local_images: Mutex<HashSet<String>>,
    launched: Mutex<Vec<LaunchSpec>>,
    started: Mutex<Vec<LaunchSpec>>,
    killed: Mutex<Vec<String>>,
    waited: Mutex<Vec<String>>,
    pulled: Mutex<Vec<String>>,
}

impl FakeRuntime {
    /// Operator containers exit with these codes in order, then with 0
    pub fn with_exit_codes(codes: impl IntoIterator<Item = i64>) -> Self {
        let runtime = Self::default();
        runtime.exit_codes.lock().unwrap().extend(codes);
        runtime
    }

    /// Detached runs execute these shell scripts in order, then print `FAKE_ID`
    pub fn with_launch_scripts(scripts: impl IntoIterator<Item = String>) -> Self {
        let runtime = Self::default();
        runtime.launch_scripts.lock().unwrap().extend(scripts);
        runtime
    }

    pub fn with_local_images(images: &[&str]) -> Self {
        let runtime = Self::default();
        runtime
            .local_images
            .lock()
            .unwrap()
            .extend(images.iter().map(|i| i.to_string()));
        runtime
    }

    /// Operator launches, in order
    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().unwrap().clone()
    }

    /// Service containers started, in order
    pub fn started(&self) -> Vec<LaunchSpec> {
        self.started.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    pub fn waited(&self) -> Vec<String> {
        self.waited.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn detached_run_command(&self, spec: &LaunchSpec) -> Command {
        self.launched.lock().unwrap().push(spec.clone());
        let script = self.launch_scripts.lock().unwrap().pop_front();
        shell(&script.unwrap_or_else(|| format!("echo {FAKE_ID}")))
    }

    async fn start_detached(&self, spec: &LaunchSpec) -> Result<String> {
        let mut started = self.started.lock().unwrap();
        started.push(spec.clone());
        Ok(format!("{FAKE_SERVICE_ID}-{}", started.len()))
    }

    async fn network_address(&self, _container: &str) -> Result<String> {
        Ok(FAKE_ADDRESS.to_string())
    }

    async fn kill(&self, container: &str) -> Result<()> {
        self.killed.lock().unwrap().push(container.to_string());
        Ok(())
    }

    async fn wait(&self, container: &str) -> Result<i64> {
        self.waited.lock().unwrap().push(container.to_string());
        Ok(self.exit_codes.lock().unwrap().pop_front().unwrap_or(0))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.local_images.lock().unwrap().contains(image))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.pulled.lock().unwrap().push(image.to_string());
        Ok(())
    }
}

/// Every inference server is ready on the first probe
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyProbe;

#[async_trait]
impl StatusProbe for ReadyProbe {
    async fn status(&self, _url: &str, _timeout: Duration) -> Result<Option<u16>> {
        Ok(Some(200))
    }
}
