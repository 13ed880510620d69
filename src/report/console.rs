/// Console tables for metrics and sizing summaries
///
/// Everything is emitted through `tracing::info!`, so the tables land wherever
/// the subscriber writes.

use crate::metrics::{Metrics, OperatorSummary};
use crate::report::{OperatorReport, PipelineReport};

/// Plain text table with `+---+` borders. Cells may span several lines.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<S: Into<String>>(&mut self, row: impl IntoIterator<Item = S>) {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let widest = cell.lines().map(|l| l.chars().count()).max().unwrap_or(0);
                if i < widths.len() {
                    widths[i] = widths[i].max(widest);
                }
            }
        }
        widths
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let border = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        let border = format!("+{border}+");

        let mut out = vec![border.clone()];
        out.extend(render_row(&self.headers, &widths));
        out.push(border.clone());
        for row in &self.rows {
            out.extend(render_row(row, &widths));
        }
        out.push(border);
        out.join("\n")
    }
}

fn render_row(cells: &[String], widths: &[usize]) -> Vec<String> {
    let height = cells.iter().map(|c| c.lines().count().max(1)).max().unwrap_or(1);
    (0..height)
        .map(|line| {
            let parts: Vec<String> = widths
                .iter()
                .enumerate()
                .map(|(i, width)| {
                    let text = cells.get(i).and_then(|c| c.lines().nth(line)).unwrap_or("");
                    format!(" {text:<width$} ")
                })
                .collect();
            format!("|{}|", parts.join("|"))
        })
        .collect()
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// `Metric | Average | Maximum | Resource` rows for one summary
pub fn summary_rows(summary: &OperatorSummary) -> [[String; 4]; 2] {
    [
        [
            "CPU".to_string(),
            format!("{} %", round3(summary.cpu_avg)),
            format!("{} %", round3(summary.cpu_max)),
            format!("cpu: {}", summary.recommended_cores),
        ],
        [
            "Memory".to_string(),
            format!("{} MB", round3(summary.memory_avg)),
            format!("{} MB", round3(summary.memory_max)),
            format!("memory: {}", summary.recommended_memory_mb),
        ],
    ]
}

pub fn operator_metrics_table(metrics: &[Metrics]) -> Table {
    let mut table = Table::new(["timestamp", "cpu_percent", "memory"]);
    for m in metrics {
        table.push_row([
            m.timestamp.to_string(),
            m.cpu_percent.to_string(),
            m.memory_mb.to_string(),
        ]);
    }
    table
}

pub fn operator_summary_table(summary: &OperatorSummary) -> Table {
    let mut table = Table::new(["Metric", "Average", "Maximum", "Resource"]);
    for row in summary_rows(summary) {
        table.push_row(row);
    }
    table
}

fn operator_label(report: &OperatorReport) -> String {
    if report.failed() {
        format!("{}\n(Non-zero exitcode)", report.name)
    } else {
        report.name.clone()
    }
}

pub fn pipeline_summary_table(report: &PipelineReport) -> Table {
    let mut table = Table::new(["Operator", "Metric", "Average", "Maximum", "Resource"]);
    for op in &report.operators {
        let mut row = vec![operator_label(op)];
        match &op.summary {
            Some(summary) => {
                let [cpu, memory] = summary_rows(summary);
                row.extend(
                    cpu.iter()
                        .zip(memory.iter())
                        .map(|(c, m)| format!("{c}\n{m}")),
                );
            }
            None => row.extend(["no metrics", "-", "-", "-"].map(String::from)),
        }
        table.push_row(row);
    }
    table
}

pub fn log_operator_metrics(operator: &str, metrics: &[Metrics]) {
    tracing::info!("{:_^60}", format!("Operator {operator} Metrics Data"));
    tracing::info!("\n{}", operator_metrics_table(metrics).render());
}

pub fn log_operator_summary(operator: &str, summary: Option<&OperatorSummary>) {
    tracing::info!("{:_^60}", format!("Operator {operator} Summary"));
    match summary {
        Some(summary) => tracing::info!("\n{}", operator_summary_table(summary).render()),
        None => tracing::warn!("⚠️ Operator {} produced no metrics to summarize", operator),
    }
}

pub fn log_pipeline_summary(report: &PipelineReport) {
    tracing::info!("{:_^60}", "Pipeline Summary");
    tracing::info!("\n{}", pipeline_summary_table(report).render());
}
