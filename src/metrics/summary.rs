/// Per-operator statistics and sizing recommendations

use crate::metrics::Metrics;
use serde::Serialize;

/// Headroom added to the peak memory before rounding
pub const MEMORY_BUFFER_MB: f64 = 100.0;
/// Memory recommendations are multiples of this
pub const MEMORY_STEP_MB: f64 = 256.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OperatorSummary {
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_avg: f64,
    pub memory_max: f64,
    pub recommended_cores: u32,
    pub recommended_memory_mb: u64,
}

/// Round `x` up to the nearest multiple of `base`.
pub fn round_up_to_multiple(x: f64, base: f64) -> f64 {
    (x / base).ceil() * base
}

/// Convert a CPU percentage to whole cores.
pub fn percent_to_cores(percent: f64) -> u32 {
    (percent / 100.0).ceil().max(0.0) as u32
}

impl OperatorSummary {
    /// `None` when the operator produced no derived metrics (it exited before
    /// two samples could be taken).
    pub fn from_metrics(metrics: &[Metrics]) -> Option<Self> {
        if metrics.is_empty() {
            return None;
        }
        let count = metrics.len() as f64;

        let cpu_avg = metrics.iter().map(|m| m.cpu_percent).sum::<f64>() / count;
        let cpu_max = metrics.iter().map(|m| m.cpu_percent).fold(f64::MIN, f64::max);
        let memory_avg = metrics.iter().map(|m| m.memory_mb).sum::<f64>() / count;
        let memory_max = metrics.iter().map(|m| m.memory_mb).fold(f64::MIN, f64::max);

        Some(Self {
            cpu_avg,
            cpu_max,
            memory_avg,
            memory_max,
            recommended_cores: percent_to_cores(cpu_max),
            recommended_memory_mb: round_up_to_multiple(memory_max + MEMORY_BUFFER_MB, MEMORY_STEP_MB)
                as u64,
        })
    }
}
