/// Inference service lifecycle
///
/// Operators reach an inference server in one of two ways: a single model
/// repository server started up front for every declared model, or pipeline
/// services declared per operator and reused while consecutive operators ask
/// for the same one. Both go through `ServiceManager`.

use crate::config::InferenceConfig;
use crate::error::SizerError;
use crate::pipeline::{OperatorConfig, ServiceConfig};
use crate::runtime::docker::{ContainerRuntime, LaunchSpec, VolumeMount};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TRITON_HTTP_ENV_VAR: &str = "NVIDIA_TRITON_HTTPURI";
pub const TRITON_GRPC_ENV_VAR: &str = "NVIDIA_TRITON_GRPCURI";
pub const LEGACY_TRITON_HTTP_ENV_VAR: &str = "CLARA_TRITON_URI";
pub const LEGACY_TRTIS_HTTP_ENV_VAR: &str = "NVIDIA_CLARA_TRTISURI";

/// Where models live inside the server container
pub const MODELS_MOUNT: &str = "/models";

/// How the pipeline gets at an inference server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    NoInferenceServer,
    /// One server for the whole run, loading every declared model
    ModelRepository,
    /// Servers declared per operator
    PipelineServices,
}

/// Pick the run mode. Declaring models and services in the same pipeline is
/// not supported.
pub fn decide_run_mode(operators: &[OperatorConfig]) -> Result<RunMode> {
    let uses_models = operators.iter().any(|op| !op.models.is_empty());
    let uses_services = operators.iter().any(|op| !op.services.is_empty());

    match (uses_models, uses_services) {
        (true, true) => Err(SizerError::config(
            "model repository and pipeline services cannot be used in the same pipeline",
        )
        .into()),
        (true, false) => Ok(RunMode::ModelRepository),
        (false, true) => Ok(RunMode::PipelineServices),
        (false, false) => Ok(RunMode::NoInferenceServer),
    }
}

/// Distinct model names across all operators
pub fn required_models(operators: &[OperatorConfig]) -> BTreeSet<String> {
    operators
        .iter()
        .flat_map(|op| op.models.iter().cloned())
        .collect()
}

/// Name declared on the first line of a model's `config.pbtxt`
fn declared_model_name(first_line: &str) -> Option<&str> {
    let (_, value) = first_line.split_once(':')?;
    Some(value.trim().trim_matches('"'))
}

/// Verify that every required model has a matching `config.pbtxt`.
///
/// Returns the model names to load, in sorted order.
pub async fn check_models_directory(
    operators: &[OperatorConfig],
    models_dir: Option<&Path>,
) -> Result<Vec<String>> {
    tracing::info!("🔍 Checking model directory for dependent models ...");
    let required = required_models(operators);
    if required.is_empty() {
        tracing::debug!("Pipeline did not specify any models, skipping check for models_dir");
        return Ok(Vec::new());
    }

    let Some(models_dir) = models_dir else {
        return Err(SizerError::config(format!(
            "a models directory must be provided since the pipeline uses: {:?}",
            required
        ))
        .into());
    };

    let mut names = Vec::with_capacity(required.len());
    for model in required {
        tracing::debug!("Checking for model `{}` ...", model);
        let config_path = models_dir.join(&model).join("config.pbtxt");
        let text = match tokio::fs::read_to_string(&config_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SizerError::config(format!(
                    "model `{model}` is missing in the models directory"
                ))
                .into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", config_path.display()))
            }
        };

        let first_line = text.lines().next().unwrap_or_default();
        match declared_model_name(first_line) {
            Some(declared) if declared == model => names.push(model),
            declared => {
                return Err(SizerError::config(format!(
                    "expected name in config {:?} to be equal to directory name {model}",
                    declared.unwrap_or(first_line)
                ))
                .into());
            }
        }
    }

    tracing::info!("✅ All model directory checks are complete!");
    Ok(names)
}

/// Inference endpoint variables handed to operators that declare models
pub fn inference_variables(address: &str, config: &InferenceConfig) -> Vec<(String, String)> {
    let http = format!("{address}:{}", config.http_port);
    let grpc = format!("{address}:{}", config.grpc_port);
    vec![
        (TRITON_HTTP_ENV_VAR.to_string(), http.clone()),
        (LEGACY_TRITON_HTTP_ENV_VAR.to_string(), http.clone()),
        (LEGACY_TRTIS_HTTP_ENV_VAR.to_string(), http),
        (TRITON_GRPC_ENV_VAR.to_string(), grpc),
    ]
}

/// HTTP status probe for server readiness
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Status code of `GET url`, or `None` when the server could not be
    /// reached within `timeout`.
    async fn status(&self, url: &str, timeout: Duration) -> Result<Option<u16>>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusProbe for HttpProbe {
    async fn status(&self, url: &str, timeout: Duration) -> Result<Option<u16>> {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => Ok(Some(response.status().as_u16())),
            Err(e) if e.is_connect() || e.is_timeout() => {
                tracing::debug!("🔌 {} not reachable yet: {}", url, e);
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("status request to {url} failed")),
        }
    }
}

/// A running inference server container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceServer {
    pub container_id: String,
    pub address: String,
}

/// Services currently up, keyed by service identity
#[derive(Debug, Default)]
pub struct RunningServices {
    services: BTreeMap<String, InferenceServer>,
}

impl RunningServices {
    pub fn get(&self, identity: &str) -> Option<&InferenceServer> {
        self.services.get(identity)
    }

    pub fn insert(&mut self, identity: String, server: InferenceServer) {
        self.services.insert(identity, server);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn drain(&mut self) -> Vec<(String, InferenceServer)> {
        std::mem::take(&mut self.services).into_iter().collect()
    }
}

/// Starts, probes and stops inference servers
pub struct ServiceManager<R: ?Sized, P> {
    runtime: Arc<R>,
    probe: P,
    config: InferenceConfig,
    models_dir: Option<PathBuf>,
}

impl<R, P> ServiceManager<R, P>
where
    R: ContainerRuntime + ?Sized,
    P: StatusProbe,
{
    pub fn new(
        runtime: Arc<R>,
        probe: P,
        config: InferenceConfig,
        models_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            probe,
            config,
            models_dir,
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn server_spec(&self, image: &str, args: &[String], models: &[String]) -> LaunchSpec {
        let mut spec = LaunchSpec::new(image);
        spec.gpus = Some(1);
        spec.ports = vec![
            self.config.http_port,
            self.config.grpc_port,
            self.config.metrics_port,
        ];
        if let Some(models_dir) = &self.models_dir {
            spec.mounts.push(VolumeMount {
                host: models_dir.clone(),
                container: MODELS_MOUNT.to_string(),
            });
        }
        spec.args = args.to_vec();
        spec.args
            .extend(models.iter().map(|name| format!("--load-model={name}")));
        spec
    }

    /// Start a server and wait until it and each of `models` report ready.
    ///
    /// A server that never becomes ready is killed before the error is returned.
    pub async fn start_triton(
        &self,
        image: &str,
        args: &[String],
        models: &[String],
    ) -> Result<InferenceServer> {
        let spec = self.server_spec(image, args, models);
        tracing::debug!("🧠 Spinning up inference server with {:?}", spec);
        let container_id = self.runtime.start_detached(&spec).await?;

        let ready = async {
            let address = self.runtime.network_address(&container_id).await?;
            self.wait_ready(&address, models).await?;
            Ok::<_, anyhow::Error>(address)
        }
        .await;

        match ready {
            Ok(address) => Ok(InferenceServer {
                container_id,
                address,
            }),
            Err(e) => {
                if let Err(kill_err) = self.runtime.kill(&container_id).await {
                    tracing::warn!("⚠️ Failed to stop unready server {}: {}", container_id, kill_err);
                }
                Err(e)
            }
        }
    }

    /// Readiness probe: warm-up sleep, then poll the server status within a
    /// bounded window, then check every model once.
    pub async fn wait_ready(&self, address: &str, models: &[String]) -> Result<()> {
        tracing::debug!("⏳ Waiting and checking inference server status ...");
        tokio::time::sleep(self.config.warmup()).await;

        let base = format!("http://{address}:{}/api/status", self.config.http_port);
        let window = self.config.ready_timeout();
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= window {
                return Err(SizerError::ReadinessTimeout {
                    address: address.to_string(),
                    waited: window,
                }
                .into());
            }
            tokio::time::sleep(self.config.retry_interval()).await;

            match self.probe.status(&base, window - elapsed).await? {
                Some(200) => break,
                Some(code) => bail!("inference server at {address} is not working, status code = {code}"),
                None => continue,
            }
        }

        for model in models {
            let url = format!("{base}/{model}");
            match self.probe.status(&url, window).await? {
                Some(200) => tracing::debug!("✅ Model {} is ready", model),
                Some(code) => bail!("model `{model}` is not ready, status code = {code}"),
                None => bail!("model `{model}` status could not be retrieved from {address}"),
            }
        }

        tracing::debug!("✅ Inference server is ready to be used");
        Ok(())
    }

    /// Start the model repository server for every model the pipeline uses.
    pub async fn start_model_repository(&self, operators: &[OperatorConfig]) -> Result<InferenceServer> {
        let models = check_models_directory(operators, self.models_dir.as_deref()).await?;
        let args = vec![
            "tritonserver".to_string(),
            format!("--model-repository={MODELS_MOUNT}"),
            "--model-control-mode=explicit".to_string(),
        ];
        let server = self.start_triton(&self.config.image, &args, &models).await?;
        tracing::info!(
            "🧠 Inference server {} is serving {} model(s) on {}",
            server.container_id,
            models.len(),
            server.address
        );
        Ok(server)
    }

    pub async fn stop(&self, server: &InferenceServer) -> Result<()> {
        tracing::debug!("🛑 Stopping inference server {} ...", server.container_id);
        self.runtime.kill(&server.container_id).await
    }

    /// Make sure every service `operator` declares is running, and merge its
    /// connection variables into the operator.
    pub async fn reconcile(
        &self,
        operator: &mut OperatorConfig,
        running: &mut RunningServices,
    ) -> Result<()> {
        let services: Vec<ServiceConfig> = operator.services.clone();
        for service in services {
            tracing::debug!("Checking service with name {}", service.name);
            let identity = service.identity();

            if let Some(server) = running.get(&identity) {
                tracing::debug!("♻️ Found running service that suits the needs");
                operator.merge_variables(service.connection_variables(&server.address));
                continue;
            }

            tracing::debug!("Didn't find matching service, starting new service");
            if !running.is_empty() {
                self.teardown(running).await;
            }

            if service.name.contains("triton") || service.name.contains("trtis") {
                let server = self.start_triton(&service.image, &service.args, &[]).await?;
                operator.merge_variables(service.connection_variables(&server.address));
                running.insert(identity, server);
            } else {
                tracing::warn!(
                    "⚠️ Only triton or trtis services are supported, skipping `{}`. Operator {} may fail because of this.",
                    service.name,
                    operator.name
                );
            }
        }
        Ok(())
    }

    /// Kill every running service and clear the registry.
    pub async fn teardown(&self, running: &mut RunningServices) {
        for (identity, server) in running.drain() {
            tracing::debug!("🧹 Tear down unused service {}", identity);
            if let Err(e) = self.stop(&server).await {
                tracing::warn!("⚠️ Failed to stop service {}: {}", identity, e);
            }
        }
    }
}
