/// Pipeline manifest loading
///
/// The pipeline definition is validated and import-resolved by the external
/// pipeline compiler, which writes a YAML document. This module runs the
/// compiler and maps its output onto `PipelineConfig`.

use crate::error::SizerError;
use crate::pipeline::types::{
    InputBinding, OperatorConfig, OutputBinding, PipelineConfig, ServiceConfig,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;

/// Placeholder the compiler leaves in service commands; it has no meaning when
/// the service runs outside the platform.
const SERVICE_DATA_PATH_VAR: &str = "$(NVIDIA_CLARA_SERVICE_DATA_PATH)";

#[derive(Debug, Deserialize)]
struct CompiledPipeline {
    name: String,
    #[serde(default)]
    operators: Vec<CompiledOperator>,
}

#[derive(Debug, Deserialize)]
struct CompiledOperator {
    name: String,
    container: CompiledContainer,
    #[serde(default)]
    variables: Option<BTreeMap<String, serde_yaml::Value>>,
    #[serde(default)]
    input: Vec<InputBinding>,
    #[serde(default)]
    output: Option<Vec<OutputBinding>>,
    #[serde(default)]
    models: Option<Vec<CompiledModel>>,
    #[serde(default)]
    services: Option<Vec<CompiledService>>,
}

#[derive(Debug, Deserialize)]
struct CompiledContainer {
    image: String,
    tag: String,
    #[serde(default)]
    command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CompiledModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CompiledService {
    name: String,
    container: CompiledContainer,
    #[serde(default)]
    connections: CompiledConnections,
}

#[derive(Debug, Default, Deserialize)]
struct CompiledConnections {
    #[serde(default)]
    http: Vec<CompiledConnection>,
}

#[derive(Debug, Deserialize)]
struct CompiledConnection {
    name: String,
    port: u16,
}

impl CompiledContainer {
    fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

impl From<CompiledService> for ServiceConfig {
    fn from(service: CompiledService) -> Self {
        let image = service.container.image_reference();
        let args = service
            .container
            .command
            .unwrap_or_default()
            .into_iter()
            .map(|arg| arg.replace(SERVICE_DATA_PATH_VAR, ""))
            .collect();
        Self {
            name: service.name,
            image,
            args,
            connections: service
                .connections
                .http
                .into_iter()
                .map(|conn| (conn.name, conn.port))
                .collect(),
        }
    }
}

impl From<CompiledOperator> for OperatorConfig {
    fn from(op: CompiledOperator) -> Self {
        Self {
            image: op.container.image_reference(),
            args: op.container.command.unwrap_or_default(),
            variables: op
                .variables
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, scalar_to_string(value)))
                .collect(),
            inputs: op.input,
            outputs: op.output.unwrap_or_default(),
            models: op
                .models
                .unwrap_or_default()
                .into_iter()
                .map(|model| model.name)
                .collect(),
            services: op
                .services
                .unwrap_or_default()
                .into_iter()
                .map(ServiceConfig::from)
                .collect(),
            name: op.name,
        }
    }
}

/// Parse the compiler's YAML output.
pub fn parse_compiled_manifest(yaml: &str) -> Result<PipelineConfig> {
    let compiled: CompiledPipeline = serde_yaml::from_str(yaml).map_err(|e| {
        SizerError::config(format!("error in configuration produced by the pipeline compiler: {e}"))
    })?;

    Ok(PipelineConfig {
        name: compiled.name,
        operators: compiled
            .operators
            .into_iter()
            .map(OperatorConfig::from)
            .collect(),
    })
}

/// Run the pipeline compiler on `source` and load the result.
pub async fn compile_pipeline(compiler: &str, source: &Path) -> Result<PipelineConfig> {
    tracing::debug!("🛠️ Running pipeline compiler to validate {}", source.display());

    let result_file = tempfile::NamedTempFile::new().context("failed to create compiler output file")?;
    let output = Command::new(compiler)
        .arg("-p")
        .arg(source)
        .arg("-o")
        .arg(result_file.path())
        .arg("--resolve-imports")
        .output()
        .await
        .with_context(|| format!("failed to run pipeline compiler `{compiler}`"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!("❌ Pipeline compiler failed: {}", stderr);
        return Err(SizerError::Command {
            command: format!("{compiler} -p {}", source.display()),
            code: output.status.code(),
            stderr,
        }
        .into());
    }
    tracing::debug!(
        "📤 Pipeline compiler stdout: {}",
        String::from_utf8_lossy(&output.stdout).trim()
    );

    let yaml = tokio::fs::read_to_string(result_file.path())
        .await
        .context("failed to read pipeline compiler output")?;
    let pipeline = parse_compiled_manifest(&yaml)?;
    tracing::debug!("📥 Loaded pipeline `{}` with {} operators", pipeline.name, pipeline.operators.len());
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"
api-version: 0.4.0
name: liver-tumor-pipeline
operators:
- name: dicom-reader
  container:
    image: clara/dicom-reader
    tag: "0.8.1"
    command: ["python", "reader.py"]
  variables:
    LOG_LEVEL: debug
    RETRIES: 3
  input:
  - path: /input
  output:
  - path: /output
  - name: meta
    path: /meta
- name: liver-segmentation
  container:
    image: clara/liver
    tag: latest
  input:
  - from: dicom-reader
    path: /input
  - from: dicom-reader
    name: meta
    path: /meta
  output:
  - path: /output
  services:
  - name: trtis
    container:
      image: nvcr.io/nvidia/tritonserver
      tag: 20.07-v1-py3
      command: ["trtserver", "--model-store=$(NVIDIA_CLARA_SERVICE_DATA_PATH)/models"]
    connections:
      http:
      - name: NVIDIA_CLARA_TRTISURI
        port: 8000
"#;

    #[test]
    fn parses_operators_bindings_and_services() {
        let pipeline = parse_compiled_manifest(MANIFEST).unwrap();
        assert_eq!(pipeline.name, "liver-tumor-pipeline");
        assert_eq!(pipeline.operators.len(), 2);

        let reader = &pipeline.operators[0];
        assert_eq!(reader.image, "clara/dicom-reader:0.8.1");
        assert_eq!(reader.args, vec!["python", "reader.py"]);
        assert_eq!(reader.variables["RETRIES"], "3");
        assert_eq!(reader.outputs[1].name.as_deref(), Some("meta"));
        assert!(reader.services.is_empty());

        let seg = &pipeline.operators[1];
        assert_eq!(seg.dependencies().collect::<Vec<_>>(), vec!["dicom-reader", "dicom-reader"]);
        let service = &seg.services[0];
        assert_eq!(service.image, "nvcr.io/nvidia/tritonserver:20.07-v1-py3");
        assert_eq!(service.args, vec!["trtserver", "--model-store=/models"]);
        assert_eq!(service.connections["NVIDIA_CLARA_TRTISURI"], 8000);
    }

    #[test]
    fn models_are_flattened_to_names() {
        let yaml = r#"
name: p
operators:
- name: infer
  container: { image: infer, tag: "1" }
  input: [{ path: /input }]
  models: [{ name: spleen }, { name: liver }]
"#;
        let pipeline = parse_compiled_manifest(yaml).unwrap();
        assert_eq!(pipeline.operators[0].models, vec!["spleen", "liver"]);
    }

    #[test]
    fn malformed_yaml_is_a_configuration_error() {
        let err = parse_compiled_manifest("name: [unterminated").unwrap_err();
        assert!(err.to_string().contains("pipeline compiler"));
    }
}
