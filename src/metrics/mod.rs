/// Resource usage metrics
///
/// Raw cumulative counters are read from the host per container; CPU percent and
/// memory are derived from pairs of adjacent raw samples, and summaries turn a
/// whole run into sizing recommendations.

// Container accounting files and the sampling loop
pub mod sampler;

// Per-operator statistics and sizing recommendations
pub mod summary;

use serde::Serialize;

pub use sampler::{AccountingPaths, Container, HostCpu, Sampler};
pub use summary::OperatorSummary;

pub const NS_PER_S: f64 = 1e9;
pub const BYTES_PER_MB: f64 = 1e6;

/// One reading of the cumulative counters for a container
#[derive(Debug, Clone, PartialEq)]
pub struct RawMetrics {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Cumulative container CPU time in nanoseconds
    pub cpu_ns: f64,
    /// Per-core cumulative CPU time, kept verbatim
    pub per_cpu: Vec<u8>,
    /// Cumulative host CPU time in seconds
    pub host_cpu_s: f64,
    /// Resident memory in bytes
    pub memory_bytes: f64,
}

/// Usage over the interval between two raw samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    /// Midpoint of the two raw sample timestamps
    pub timestamp: f64,
    pub cpu_percent: f64,
    /// Average resident memory in MB
    #[serde(rename = "memory")]
    pub memory_mb: f64,
}

/// Items on the sampler -> writer channel. `End` closes the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsEvent {
    Sample(Metrics),
    End,
}

impl Metrics {
    /// Derive usage between `prev` and `cur`.
    ///
    /// CPU percent is scaled to the number of online cores, so a container
    /// saturating two cores reports 200%.
    pub fn derive(prev: &RawMetrics, cur: &RawMetrics, online_cpus: f64) -> Self {
        let timestamp = (prev.timestamp + cur.timestamp) / 2.0;

        let cpu_delta = (cur.cpu_ns - prev.cpu_ns) / NS_PER_S;
        let host_delta = cur.host_cpu_s - prev.host_cpu_s;
        let cpu_percent = if cpu_delta > 0.0 && host_delta > 0.0 {
            (cpu_delta / host_delta) * online_cpus * 100.0
        } else {
            0.0
        };

        // Averaged to line up with the averaged timestamp
        let memory_mb = (prev.memory_bytes + cur.memory_bytes) / 2.0 / BYTES_PER_MB;

        Self {
            timestamp,
            cpu_percent,
            memory_mb,
        }
    }
}
