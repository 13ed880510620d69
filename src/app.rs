/// Application wiring
///
/// Checks the host, compiles and orders the pipeline, makes sure every image is
/// available, then hands the ordered operators to the execution engine.

use crate::config::Config;
use crate::error::SizerError;
use crate::pipeline::{manifest::compile_pipeline, sort_operators};
use crate::report::PipelineReport;
use crate::runtime::images::ensure_images;
use crate::runtime::{DockerCli, ExecutionEngine, HttpProbe, RunOptions, StdinConfirm};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// First executable named `program` on `PATH`
pub fn find_program(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Fail with a configuration error when `program` is not installed.
pub fn assert_installed(program: &str) -> Result<()> {
    tracing::debug!("Checking for dependency {} ...", program);
    match find_program(program) {
        Some(path) => {
            tracing::debug!("Dependency {} fulfilled at {}", program, path.display());
            Ok(())
        }
        None => Err(SizerError::config(format!(
            "{program} not installed, please install {program}"
        ))
        .into()),
    }
}

/// Size every operator of the pipeline defined at `pipeline_path`.
pub async fn run(config: Config, pipeline_path: &Path, options: RunOptions) -> Result<PipelineReport> {
    assert_installed(&config.compiler.binary)?;
    assert_installed(&config.runtime.binary)?;
    tracing::info!("✅ All software dependencies are fulfilled.");

    let pipeline = compile_pipeline(&config.compiler.binary, pipeline_path).await?;
    tracing::info!(
        "📋 Pipeline '{}' has {} operator(s)",
        pipeline.name,
        pipeline.operators.len()
    );

    let runtime = Arc::new(DockerCli::new(&config.runtime.binary));
    ensure_images(runtime.as_ref(), &pipeline.operators, &config.inference).await?;

    let execution_order = sort_operators(pipeline.operators)?;
    tracing::debug!(
        "🔄 Execution order: {:?}",
        execution_order.iter().map(|op| op.name.as_str()).collect::<Vec<_>>()
    );

    let engine = ExecutionEngine::new(&config, runtime, HttpProbe::new(), Box::new(StdinConfirm));
    engine.run_pipeline(execution_order, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;

    #[test]
    fn finds_programs_on_path() {
        assert!(find_program("sh").is_some());
        assert!(find_program("definitely-not-a-real-program-name").is_none());
    }

    #[test]
    fn missing_program_is_a_configuration_error() {
        let err = assert_installed("definitely-not-a-real-program-name").unwrap_err();
        assert!(matches!(classify(&err), Some(SizerError::Configuration(_))));
        assert!(assert_installed("sh").is_ok());
    }
}
