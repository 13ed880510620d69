/// Run results and their presentation
///
/// The engine produces a `PipelineReport`; this module turns it, and the
/// metrics streamed while operators run, into CSV files and console tables.

// Console tables
pub mod console;

// Per-operator CSV writer task
pub mod writer;

use crate::metrics::OperatorSummary;
use serde::Serialize;

pub use writer::{result_path, spawn_csv_writer};

/// Outcome of one operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorReport {
    pub name: String,
    /// Final container exit status, `None` when no container id was obtained
    pub exit_code: Option<i64>,
    /// `None` when no metrics could be derived
    pub summary: Option<OperatorSummary>,
}

impl OperatorReport {
    pub fn failed(&self) -> bool {
        self.exit_code != Some(0)
    }
}

/// Outcome of a pipeline run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub operators: Vec<OperatorReport>,
    /// The run was halted by the continuation policy before every operator ran
    pub stopped_early: bool,
}

impl PipelineReport {
    pub fn failed_operators(&self) -> impl Iterator<Item = &OperatorReport> {
        self.operators.iter().filter(|op| op.failed())
    }

    pub fn get(&self, name: &str) -> Option<&OperatorReport> {
        self.operators.iter().find(|op| op.name == name)
    }
}
