/// Pipeline execution engine
///
/// Runs sorted operators strictly one at a time. For each operator it prepares
/// the inference server the operator needs, starts its container, samples it
/// until it exits, and applies the continuation policy when it fails.

use crate::config::{Config, FailurePolicy, InferenceConfig};
use crate::error::{classify, SizerError};
use crate::metrics::{Container, OperatorSummary, Sampler};
use crate::pipeline::OperatorConfig;
use crate::report::{console, result_path, spawn_csv_writer, OperatorReport, PipelineReport};
use crate::runtime::docker::{ContainerRuntime, LaunchSpec, VolumeMount};
use crate::runtime::launcher::spawn_operator;
use crate::runtime::prompt::{Confirm, CONTINUE_QUESTION};
use crate::runtime::services::{
    decide_run_mode, inference_variables, RunMode, RunningServices, ServiceManager, StatusProbe,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const NO_SYNC_CLOCK_VAR: &str = "NVIDIA_CLARA_NOSYNCLOCK";

/// Per-run inputs
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Payload mounted for inputs without a producer
    pub input_dir: PathBuf,
    /// Write per-operator CSV files here instead of printing metrics tables
    pub metrics_dir: Option<PathBuf>,
    /// Model repository for inference servers
    pub models_dir: Option<PathBuf>,
    pub policy: FailurePolicy,
}

/// Sequential operator runner
pub struct ExecutionEngine<R: ?Sized, P> {
    runtime: Arc<R>,
    probe: P,
    confirm: Box<dyn Confirm>,
    sampler: Sampler,
    inference: InferenceConfig,
    id_wait: Duration,
    cgroup_root: PathBuf,
}

/// Host directory an operator writes its outputs to
fn operator_output_dir(workdir: &Path, operator: &str) -> PathBuf {
    workdir.join(operator)
}

/// Build the detached launch for one operator, creating its output
/// directories under `workdir`.
pub async fn build_launch_spec(
    operator: &OperatorConfig,
    input_dir: &Path,
    workdir: &Path,
    model_server: Option<&str>,
    inference: &InferenceConfig,
) -> Result<LaunchSpec> {
    tracing::debug!("🔧 Constructing launch for operator {} ...", operator.name);
    let output_dir = operator_output_dir(workdir, &operator.name);
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut spec = LaunchSpec::new(&operator.image);
    spec.args = operator.args.clone();
    spec.env.push((NO_SYNC_CLOCK_VAR.to_string(), "1".to_string()));

    if !operator.models.is_empty() {
        if let Some(address) = model_server {
            spec.env.extend(inference_variables(address, inference));
        }
    }
    spec.env.extend(
        operator
            .variables
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    for input in &operator.inputs {
        let host = match (&input.from, &input.name) {
            (None, _) => input_dir.to_path_buf(),
            (Some(producer), None) => operator_output_dir(workdir, producer),
            (Some(producer), Some(name)) => operator_output_dir(workdir, producer).join(name),
        };
        spec.mounts.push(VolumeMount {
            host,
            container: input.path.clone(),
        });
    }

    for output in &operator.outputs {
        let host = match &output.name {
            Some(name) => {
                let sub_dir = output_dir.join(name);
                tokio::fs::create_dir_all(&sub_dir)
                    .await
                    .with_context(|| format!("failed to create {}", sub_dir.display()))?;
                sub_dir
            }
            None => output_dir.clone(),
        };
        spec.mounts.push(VolumeMount {
            host,
            container: output.path.clone(),
        });
    }

    tracing::debug!("Launch for operator {} is: {:?}", operator.name, spec);
    Ok(spec)
}

impl<R, P> ExecutionEngine<R, P>
where
    R: ContainerRuntime + ?Sized + 'static,
    P: StatusProbe + Clone,
{
    pub fn new(config: &Config, runtime: Arc<R>, probe: P, confirm: Box<dyn Confirm>) -> Self {
        Self {
            runtime,
            probe,
            confirm,
            sampler: Sampler::from_config(config),
            inference: config.inference.clone(),
            id_wait: config.runtime.id_wait(),
            cgroup_root: config.runtime.cgroup_root.clone(),
        }
    }

    /// Run every operator in order and report what each one used.
    ///
    /// Inference servers started for the run are stopped and the temporary
    /// working directory is removed on every exit path.
    pub async fn run_pipeline(
        &self,
        operators: Vec<OperatorConfig>,
        options: &RunOptions,
    ) -> Result<PipelineReport> {
        let run_started = Instant::now();
        let mode = decide_run_mode(&operators)?;
        tracing::debug!("Run mode for this pipeline: {:?}", mode);

        let workdir = tempfile::Builder::new()
            .prefix("opsizer-")
            .tempdir()
            .context("failed to create temporary working directory")?;
        let services = ServiceManager::new(
            self.runtime.clone(),
            self.probe.clone(),
            self.inference.clone(),
            options.models_dir.clone(),
        );

        let result = match mode {
            RunMode::NoInferenceServer => {
                self.run_operators(operators, options, workdir.path(), None, None)
                    .await
            }
            RunMode::ModelRepository => {
                let server = services.start_model_repository(&operators).await?;
                let result = self
                    .run_operators(
                        operators,
                        options,
                        workdir.path(),
                        Some(&server.address),
                        None,
                    )
                    .await;
                if let Err(e) = services.stop(&server).await {
                    tracing::warn!("⚠️ Failed to stop inference server {}: {}", server.container_id, e);
                }
                tracing::debug!("Finished cleaning up inference server");
                result
            }
            RunMode::PipelineServices => {
                let mut running = RunningServices::default();
                let result = self
                    .run_operators(
                        operators,
                        options,
                        workdir.path(),
                        None,
                        Some((&services, &mut running)),
                    )
                    .await;
                services.teardown(&mut running).await;
                result
            }
        };

        let report = result?;
        console::log_pipeline_summary(&report);
        tracing::info!(
            "🎉 Pipeline finished in {:?}: {} operator(s) run, {} failed",
            run_started.elapsed(),
            report.operators.len(),
            report.failed_operators().count()
        );
        Ok(report)
    }

    async fn run_operators(
        &self,
        operators: Vec<OperatorConfig>,
        options: &RunOptions,
        workdir: &Path,
        model_server: Option<&str>,
        mut services: Option<(&ServiceManager<R, P>, &mut RunningServices)>,
    ) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        let total = operators.len();

        for (step, mut operator) in operators.into_iter().enumerate() {
            if let Some((manager, running)) = services.as_mut() {
                if !operator.services.is_empty() {
                    manager.reconcile(&mut operator, running).await?;
                }
            }

            tracing::info!("{:_^60}", format!("Executing Operator {}", operator.name));
            tracing::info!("📍 Step {}/{}: operator '{}'", step + 1, total, operator.name);
            let spec = build_launch_spec(
                &operator,
                &options.input_dir,
                workdir,
                model_server,
                &self.inference,
            )
            .await?;

            let outcome = match self
                .run_operator(&operator, &spec, options.metrics_dir.as_deref())
                .await
            {
                Ok(outcome) => outcome,
                Err(e) if classify(&e).is_some_and(SizerError::is_operator_failure) => {
                    tracing::warn!("⚠️ {}", e);
                    OperatorReport {
                        name: operator.name.clone(),
                        exit_code: None,
                        summary: None,
                    }
                }
                Err(e) => return Err(e),
            };

            let failed = outcome.failed();
            report.operators.push(outcome);
            if failed && !self.should_continue(options.policy).await? {
                tracing::info!("🛑 Stopping the pipeline after operator {}", operator.name);
                report.stopped_early = true;
                break;
            }
        }
        Ok(report)
    }

    /// Launch one operator, sample it until it exits, then summarize.
    pub async fn run_operator(
        &self,
        operator: &OperatorConfig,
        spec: &LaunchSpec,
        metrics_dir: Option<&Path>,
    ) -> Result<OperatorReport> {
        let command = self.runtime.detached_run_command(spec);
        let before_id = Instant::now();
        let running = spawn_operator(self.runtime.clone(), command, &operator.name)
            .acquire(self.id_wait)
            .await?;
        let after_id = Instant::now();
        tracing::debug!("Time it takes to get container ID: {:?}", after_id - before_id);

        let mut container = Container::new(running.id.clone(), &self.cgroup_root)?;
        let writer = metrics_dir.map(|dir| spawn_csv_writer(result_path(dir, &operator.name)));

        let sampled = self
            .sampler
            .run(
                &mut container,
                writer.as_ref().map(|(tx, _)| tx),
                &running.finished(),
            )
            .await;
        let exit_code = running.exit_status().await?;
        tracing::debug!("Waiting and Sampling Time: {:?}", after_id.elapsed());

        if let Some((tx, handle)) = writer {
            drop(tx);
            handle.await.context("metrics writer task panicked")??;
        }
        let stats = sampled?;
        if stats.overruns > 0 {
            tracing::debug!("{} sampling tick(s) overran the period", stats.overruns);
        }

        if metrics_dir.is_none() {
            console::log_operator_metrics(&operator.name, container.metrics());
        }
        let summary = OperatorSummary::from_metrics(container.metrics());
        console::log_operator_summary(&operator.name, summary.as_ref());

        if exit_code != 0 {
            tracing::warn!(
                "⚠️ {}",
                SizerError::RuntimeFailure {
                    operator: operator.name.clone(),
                    code: exit_code,
                }
            );
        }

        Ok(OperatorReport {
            name: operator.name.clone(),
            exit_code: Some(exit_code),
            summary,
        })
    }

    async fn should_continue(&self, policy: FailurePolicy) -> Result<bool> {
        match policy {
            FailurePolicy::Continue => Ok(true),
            FailurePolicy::Stop => Ok(false),
            FailurePolicy::Prompt => self.confirm.confirm(CONTINUE_QUESTION).await,
        }
    }
}
