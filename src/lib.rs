/// opsizer: pipeline operator sizing tool
///
/// This library runs a containerized pipeline one operator at a time, samples
/// each operator's CPU and memory while it runs, and recommends the cores and
/// memory to deploy it with.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Pipeline definition layer - manifest loading and dependency ordering
pub mod pipeline;

// Resource sampling and sizing computation
pub mod metrics;

// Runtime execution layer - container launch, inference services, sequential execution
pub mod runtime;

// Console and CSV output of run results
pub mod report;

// Command-line surface
pub mod cli;

// Wiring from a pipeline file to a finished run
pub mod app;

// Re-export commonly used types for external consumers
pub use config::{Config, FailurePolicy};
pub use error::SizerError;
pub use pipeline::{OperatorConfig, PipelineConfig};
pub use report::{OperatorReport, PipelineReport};
pub use runtime::{ExecutionEngine, RunOptions};
