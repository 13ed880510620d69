/// Runtime execution layer
///
/// This module drives containers for a sorted pipeline. It handles:
/// - The container runtime boundary (docker CLI behind a trait)
/// - The launch protocol that hands back a container id under a timeout
/// - Inference server lifecycle for operators that need one
/// - Sequential operator execution with sampling and the continuation policy

// Container runtime trait and docker CLI implementation
pub mod docker;

// Operator launch protocol
pub mod launcher;

// Inference server lifecycle and readiness probing
pub mod services;

// Sequential pipeline execution
pub mod engine;

// Image presence check and pull
pub mod images;

// Continuation prompt
pub mod prompt;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use docker::{ContainerRuntime, DockerCli, LaunchSpec};
pub use engine::{ExecutionEngine, RunOptions};
pub use prompt::{Confirm, StdinConfirm};
pub use services::{HttpProbe, RunMode};
