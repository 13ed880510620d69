/// Core pipeline type definitions
///
/// The compiled manifest is turned into these structures once and then only the
/// orchestrator touches them (to merge service connection variables).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete pipeline: its name and operators in manifest order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub operators: Vec<OperatorConfig>,
}

/// One containerized stage of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Unique operator name within the pipeline
    pub name: String,
    /// Image reference (`image:tag`)
    pub image: String,
    /// Container arguments appended after the image
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables passed to the container
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<InputBinding>,
    #[serde(default)]
    pub outputs: Vec<OutputBinding>,
    /// Inference models served from the shared model repository
    #[serde(default)]
    pub models: Vec<String>,
    /// Inference services this operator needs running while it executes
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Input mount. Without `from` it maps the pipeline input payload directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Producing operator whose output directory is mounted
    #[serde(default)]
    pub from: Option<String>,
    /// Subdirectory of the producer's output
    #[serde(default)]
    pub name: Option<String>,
    /// Mount path inside the container
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    /// Subdirectory created under the operator's output directory
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
}

/// A dependent service (inference server) declared by an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Logical connection name -> container port
    #[serde(default)]
    pub connections: BTreeMap<String, u16>,
}

impl ServiceConfig {
    /// Two declarations with the same identity can share one running instance.
    pub fn identity(&self) -> String {
        format!("{} {}", self.image, self.args.join(" "))
    }

    /// Connection variables (`logical_name -> "address:port"`) for a running instance
    pub fn connection_variables(&self, address: &str) -> BTreeMap<String, String> {
        self.connections
            .iter()
            .map(|(name, port)| (name.clone(), format!("{address}:{port}")))
            .collect()
    }
}

impl OperatorConfig {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            args: Vec::new(),
            variables: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            models: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Merge service-provided variables; values the operator declared itself win.
    pub fn merge_variables(&mut self, provided: BTreeMap<String, String>) {
        for (key, value) in provided {
            self.variables.entry(key).or_insert(value);
        }
    }

    /// Names of operators this one reads from, in binding order
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|input| input.from.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn triton_service(args: &[&str]) -> ServiceConfig {
        ServiceConfig {
            name: "triton".into(),
            image: "nvcr.io/nvidia/tritonserver:20.07-v1-py3".into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            connections: BTreeMap::from([("NVIDIA_TRITON_HTTPURI".to_string(), 8000)]),
        }
    }

    #[test]
    fn service_identity_joins_image_and_args() {
        let service = triton_service(&["tritonserver", "--model-repository=/models"]);
        assert_eq!(
            service.identity(),
            "nvcr.io/nvidia/tritonserver:20.07-v1-py3 tritonserver --model-repository=/models"
        );
    }

    #[test]
    fn connection_variables_use_address_and_port() {
        let vars = triton_service(&[]).connection_variables("172.17.0.3");
        assert_eq!(
            vars,
            BTreeMap::from([("NVIDIA_TRITON_HTTPURI".to_string(), "172.17.0.3:8000".to_string())])
        );
    }

    #[test]
    fn merge_keeps_operator_declared_values() {
        let mut op = OperatorConfig::new("seg", "seg:1");
        op.variables.insert("A".into(), "mine".into());
        op.merge_variables(BTreeMap::from([
            ("A".to_string(), "service".to_string()),
            ("B".to_string(), "service".to_string()),
        ]));
        assert_eq!(op.variables["A"], "mine");
        assert_eq!(op.variables["B"], "service");
    }
}
