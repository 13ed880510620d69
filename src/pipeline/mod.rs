/// Pipeline definition layer
///
/// This module handles everything known before a container starts:
/// - Type definitions (PipelineConfig, OperatorConfig, ServiceConfig, bindings)
/// - Loading the compiled manifest produced by the pipeline compiler
/// - Dependency ordering of operators

// Core pipeline type definitions
pub mod types;

// Compiler invocation and manifest parsing
pub mod manifest;

// Petgraph dependency graph and topological ordering
pub mod sort;

// Re-export commonly used types
pub use sort::sort_operators;
pub use types::{InputBinding, OperatorConfig, OutputBinding, PipelineConfig, ServiceConfig};
