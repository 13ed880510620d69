/// Container accounting files and the periodic sampling loop
///
/// The container runtime exposes cumulative CPU and memory counters per
/// container under the cgroup v1 hierarchy. They exist exactly as long as the
/// container does, so their disappearance is what ends sampling.

use crate::config::Config;
use crate::metrics::{Metrics, MetricsEvent, RawMetrics};
use anyhow::{bail, Context, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Fields of the aggregate `cpu` line summed into host CPU time:
/// user, nice, system, idle, iowait, irq, softirq.
const HOST_CPU_FIELDS: usize = 7;

/// The three per-container accounting files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingPaths {
    /// Cumulative CPU time (ns)
    pub cpu: PathBuf,
    /// Per-core cumulative CPU time (ns, space separated)
    pub per_cpu: PathBuf,
    /// Resident memory (bytes)
    pub memory: PathBuf,
}

impl AccountingPaths {
    pub fn for_container(cgroup_root: &Path, id: &str) -> Self {
        let cpuacct = cgroup_root.join("cpuacct").join("docker").join(id);
        Self {
            cpu: cpuacct.join("cpuacct.usage"),
            per_cpu: cpuacct.join("cpuacct.usage_percpu"),
            memory: cgroup_root
                .join("memory")
                .join("docker")
                .join(id)
                .join("memory.usage_in_bytes"),
        }
    }

    pub async fn all_exist(&self) -> bool {
        for path in [&self.cpu, &self.per_cpu, &self.memory] {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return false;
            }
        }
        true
    }
}

/// Host-wide CPU time source and core count
#[derive(Debug, Clone)]
pub struct HostCpu {
    stat_path: PathBuf,
    clock_ticks: f64,
    online_cpus: f64,
}

impl HostCpu {
    pub fn new(stat_path: impl Into<PathBuf>, clock_ticks: f64, online_cpus: f64) -> Self {
        Self {
            stat_path: stat_path.into(),
            clock_ticks,
            online_cpus,
        }
    }

    /// Read clock tick rate and online core count from the running system.
    pub fn detect(stat_path: impl Into<PathBuf>) -> Self {
        // SAFETY: sysconf has no preconditions and only reads system limits.
        let (ticks, online) = unsafe {
            (
                libc::sysconf(libc::_SC_CLK_TCK),
                libc::sysconf(libc::_SC_NPROCESSORS_ONLN),
            )
        };
        let clock_ticks = if ticks > 0 { ticks as f64 } else { 100.0 };
        let online_cpus = if online > 0 {
            online as f64
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get() as f64)
                .unwrap_or(1.0)
        };
        Self::new(stat_path, clock_ticks, online_cpus)
    }

    pub fn online_cpus(&self) -> f64 {
        self.online_cpus
    }

    /// Cumulative host CPU time in seconds
    pub async fn cumulative_seconds(&self) -> io::Result<f64> {
        let text = tokio::fs::read_to_string(&self.stat_path).await?;
        parse_proc_stat(&text, self.clock_ticks)
    }
}

fn parse_proc_stat(text: &str, clock_ticks: f64) -> io::Result<f64> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
    let line = text
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| invalid("no aggregate cpu line in stat file"))?;

    let mut ticks = 0u64;
    for field in line.split_whitespace().skip(1).take(HOST_CPU_FIELDS) {
        ticks += field
            .parse::<u64>()
            .map_err(|_| invalid("non-numeric cpu field in stat file"))?;
    }
    Ok(ticks as f64 / clock_ticks)
}

/// Read errors meaning the container went away between check and read
fn is_transient(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENODEV)
}

async fn read_counter(path: &Path) -> io::Result<f64> {
    let text = tokio::fs::read_to_string(path).await?;
    text.trim().parse::<f64>().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected content in {}: {:?}", path.display(), text.trim()),
        )
    })
}

/// A running operator container and everything sampled from it
#[derive(Debug)]
pub struct Container {
    id: String,
    paths: AccountingPaths,
    raw_metrics: Vec<RawMetrics>,
    metrics: Vec<Metrics>,
}

impl Container {
    /// Accounting paths are fixed here, from the runtime-assigned id.
    pub fn new(id: impl Into<String>, cgroup_root: &Path) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            bail!("container id is not set when creating accounting paths");
        }
        let paths = AccountingPaths::for_container(cgroup_root, &id);
        Ok(Self {
            id,
            paths,
            raw_metrics: Vec::new(),
            metrics: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn paths(&self) -> &AccountingPaths {
        &self.paths
    }

    pub fn raw_metrics(&self) -> &[RawMetrics] {
        &self.raw_metrics
    }

    pub fn metrics(&self) -> &[Metrics] {
        &self.metrics
    }

    async fn read_raw(&self, host: &HostCpu) -> io::Result<RawMetrics> {
        let timestamp = chrono::Utc::now().timestamp_micros() as f64 / 1e6;
        let host_cpu_s = host.cumulative_seconds().await?;
        let cpu_ns = read_counter(&self.paths.cpu).await?;
        let per_cpu = tokio::fs::read(&self.paths.per_cpu).await?;
        let memory_bytes = read_counter(&self.paths.memory).await?;
        Ok(RawMetrics {
            timestamp,
            cpu_ns,
            per_cpu,
            host_cpu_s,
            memory_bytes,
        })
    }

    /// Take one raw sample. Returns the derived metrics once two samples exist.
    ///
    /// A file vanishing mid-read is not an error: the tick is skipped.
    pub async fn sample(&mut self, host: &HostCpu) -> Result<Option<Metrics>> {
        let raw = match self.read_raw(host).await {
            Ok(raw) => raw,
            Err(e) if is_transient(&e) => {
                tracing::debug!("⏭️ Accounting files for {} went away mid-read: {}", self.id, e);
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to sample container {}", self.id))
            }
        };
        self.raw_metrics.push(raw);

        let count = self.raw_metrics.len();
        if count < 2 {
            return Ok(None);
        }
        let metric = Metrics::derive(
            &self.raw_metrics[count - 2],
            &self.raw_metrics[count - 1],
            host.online_cpus(),
        );
        self.metrics.push(metric);
        Ok(Some(metric))
    }
}

/// Counters describing one sampling run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SamplingStats {
    /// Ticks where sampling took at least a full period
    pub overruns: usize,
}

/// Fixed-period sampler for one container at a time
#[derive(Debug, Clone)]
pub struct Sampler {
    period: Duration,
    existence_poll: Duration,
    host: HostCpu,
}

impl Sampler {
    pub fn new(period: Duration, existence_poll: Duration, host: HostCpu) -> Self {
        Self {
            period,
            existence_poll,
            host,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sampling.period(),
            config.sampling.existence_poll(),
            HostCpu::detect(&config.runtime.proc_stat_path),
        )
    }

    /// Sample `container` until its accounting files disappear.
    ///
    /// Waits for the files to appear first, giving up if `launcher_done` fires
    /// before they do. `MetricsEvent::End` is always sent to `sink` on return.
    pub async fn run(
        &self,
        container: &mut Container,
        sink: Option<&UnboundedSender<MetricsEvent>>,
        launcher_done: &CancellationToken,
    ) -> Result<SamplingStats> {
        let result = self.sample_until_gone(container, sink, launcher_done).await;
        if let Some(sink) = sink {
            // A closed receiver only means nobody is writing this run out
            let _ = sink.send(MetricsEvent::End);
        }
        result
    }

    async fn sample_until_gone(
        &self,
        container: &mut Container,
        sink: Option<&UnboundedSender<MetricsEvent>>,
        launcher_done: &CancellationToken,
    ) -> Result<SamplingStats> {
        let mut stats = SamplingStats::default();

        while !container.paths().all_exist().await {
            if launcher_done.is_cancelled() {
                tracing::warn!(
                    "⚠️ Container {} finished before its accounting files appeared",
                    container.id()
                );
                return Ok(stats);
            }
            tokio::time::sleep(self.existence_poll).await;
        }

        tracing::debug!("📊 Starts sampling container {}", container.id());
        let mut before = Instant::now();
        while container.paths().all_exist().await {
            if let Some(metric) = container.sample(&self.host).await? {
                if let Some(sink) = sink {
                    let _ = sink.send(MetricsEvent::Sample(metric));
                }
            }

            let elapsed = before.elapsed();
            if elapsed >= self.period {
                stats.overruns += 1;
                tracing::info!(
                    "Sampling taking longer than sampling period with time of {:?}",
                    elapsed
                );
            } else {
                tokio::time::sleep(self.period - elapsed).await;
            }
            before = Instant::now();
        }

        tracing::debug!(
            "✅ Finished sampling container {} ({} raw samples)",
            container.id(),
            container.raw_metrics().len()
        );
        Ok(stats)
    }
}
