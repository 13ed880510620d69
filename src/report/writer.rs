/// Per-operator CSV output of derived metrics

use crate::metrics::MetricsEvent;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub const METRICS_HEADER: [&str; 3] = ["timestamp", "cpu_percent", "memory"];

/// `<metrics_dir>/<operator>_final_result.csv`
pub fn result_path(metrics_dir: &Path, operator: &str) -> PathBuf {
    metrics_dir.join(format!("{operator}_final_result.csv"))
}

/// Start a writer consuming metrics until `MetricsEvent::End` or until every
/// sender is dropped. Each row is flushed as it arrives.
pub fn spawn_csv_writer(path: PathBuf) -> (UnboundedSender<MetricsEvent>, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || write_rows(&path, rx));
    (tx, handle)
}

fn write_rows(path: &Path, mut rx: UnboundedReceiver<MetricsEvent>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(METRICS_HEADER)?;
    writer.flush()?;

    while let Some(event) = rx.blocking_recv() {
        match event {
            MetricsEvent::Sample(metrics) => {
                writer.serialize(metrics)?;
                writer.flush()?;
            }
            MetricsEvent::End => break,
        }
    }
    writer.flush()?;

    tracing::info!("💾 Results are stored in {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_header_and_rows_until_end() {
        let dir = TempDir::new().unwrap();
        let path = result_path(&dir.path().join("nested"), "segmentation");
        let (tx, handle) = spawn_csv_writer(path.clone());

        tx.send(MetricsEvent::Sample(Metrics { timestamp: 2.5, cpu_percent: 50.0, memory_mb: 7.5 }))
            .unwrap();
        tx.send(MetricsEvent::End).unwrap();
        // Anything after the sentinel is not written
        let _ = tx.send(MetricsEvent::Sample(Metrics { timestamp: 9.0, cpu_percent: 1.0, memory_mb: 1.0 }));
        handle.await.unwrap().unwrap();

        assert!(path.ends_with("segmentation_final_result.csv"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "timestamp,cpu_percent,memory\n2.5,50.0,7.5\n");
    }

    #[tokio::test]
    async fn empty_run_still_has_header() {
        let dir = TempDir::new().unwrap();
        let path = result_path(dir.path(), "idle");
        let (tx, handle) = spawn_csv_writer(path.clone());
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "timestamp,cpu_percent,memory\n");
    }
}
