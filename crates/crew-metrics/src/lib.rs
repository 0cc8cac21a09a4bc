//! Append-only per-repository task metrics (`metrics/tasks.csv`).
//!
//! One row per child invocation. Rows are encoded up front and appended
//! with a single `write` behind a mutex, so concurrent writers within a
//! daemon never interleave partial lines. Readers are tolerant of rows
//! written by other processes mid-read.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crew_core::{ExecutionMode, Role};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One metrics row, mirroring the CSV schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetric {
    pub task_id: String,
    pub utc_timestamp: DateTime<Utc>,
    pub role: Role,
    pub tool: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
    pub duration_sec: f64,
    pub success: bool,
    pub execution_mode: ExecutionMode,
    pub repo_root: String,
    /// Allow/deny globs joined with `;` for a flat cell.
    pub scope_globs: String,
    pub error_message: Option<String>,
}

impl TaskMetric {
    /// A zeroed row for `task_id` at the current time; callers fill in what
    /// they know.
    pub fn new(task_id: impl Into<String>, role: Role, repo_root: &Path) -> Self {
        Self {
            task_id: task_id.into(),
            utc_timestamp: Utc::now(),
            role,
            tool: String::new(),
            model: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            input_cost_usd: 0.0,
            output_cost_usd: 0.0,
            total_cost_usd: 0.0,
            duration_sec: 0.0,
            success: false,
            execution_mode: ExecutionMode::Full,
            repo_root: repo_root.to_string_lossy().into_owned(),
            scope_globs: String::new(),
            error_message: None,
        }
    }
}

/// Aggregates over every parseable row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_runs: u64,
    pub successes: u64,
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_sec: f64,
}

impl MetricsSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successes as f64 / self.total_runs as f64
        }
    }
}

/// Handle on one repository's metrics CSV.
#[derive(Debug)]
pub struct MetricsLog {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl MetricsLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_guard: Mutex::new(()),
        }
    }

    /// The conventional location for a repository
    /// (`<repo cache dir>/metrics/tasks.csv`).
    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(crew_config::paths::metrics_path(repo_root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row. Creates the directory and the header on first use.
    pub fn record(&self, metric: &TaskMetric) -> Result<()> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());

        let write_header = !self.path.exists();
        if write_header
            && let Some(parent) = self.path.parent()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create metrics directory {}", parent.display())
            })?;
        }

        // Encode the full row (with optional header) into one buffer so the
        // file append is a single write call.
        let mut encoder = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(Vec::new());
        encoder
            .serialize(metric)
            .context("failed to encode metrics row")?;
        encoder.flush().context("failed to flush metrics row")?;
        let buffer = encoder
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to finish metrics row: {e}"))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open metrics log {}", self.path.display()))?;
        file.write_all(&buffer)
            .with_context(|| format!("failed to append metrics row to {}", self.path.display()))?;
        Ok(())
    }

    /// All parseable rows, oldest first. Malformed rows (e.g. a torn tail
    /// from a concurrent writer) are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<TaskMetric>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to open metrics log {}", self.path.display()))?;

        let mut rows = Vec::new();
        for record in reader.deserialize() {
            match record {
                Ok(metric) => rows.push(metric),
                Err(e) => warn!(error = %e, "skipping unparseable metrics row"),
            }
        }
        Ok(rows)
    }

    /// The most recent `limit` rows, newest last.
    pub fn recent(&self, limit: usize) -> Result<Vec<TaskMetric>> {
        let mut rows = self.read_all()?;
        if rows.len() > limit {
            rows.drain(..rows.len() - limit);
        }
        Ok(rows)
    }

    /// Every parseable row as a JSON array, for external tooling.
    pub fn export_json(&self) -> Result<serde_json::Value> {
        let rows = self.read_all()?;
        serde_json::to_value(rows).context("failed to encode metrics export")
    }

    pub fn summary(&self) -> Result<MetricsSummary> {
        let mut summary = MetricsSummary::default();
        for row in self.read_all()? {
            summary.total_runs += 1;
            if row.success {
                summary.successes += 1;
            }
            summary.total_cost_usd += row.total_cost_usd;
            summary.total_input_tokens += row.input_tokens;
            summary.total_output_tokens += row.output_tokens;
            summary.total_duration_sec += row.duration_sec;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(task_id: &str, success: bool) -> TaskMetric {
        let mut metric = TaskMetric::new(task_id, Role::Coder, Path::new("/tmp/r"));
        metric.tool = "claude".to_string();
        metric.model = "sonnet".to_string();
        metric.input_tokens = 100;
        metric.output_tokens = 50;
        metric.total_cost_usd = 0.25;
        metric.duration_sec = 1.5;
        metric.success = success;
        metric.scope_globs = "**/*.py".to_string();
        metric
    }

    fn log_in(dir: &tempfile::TempDir) -> MetricsLog {
        MetricsLog::new(dir.path().join("metrics").join("tasks.csv"))
    }

    #[test]
    fn test_record_creates_dir_header_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.record(&sample("t1", true)).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("task_id,utc_timestamp"));
        assert!(lines.next().unwrap().contains("t1"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.record(&sample("t1", true)).unwrap();
        log.record(&sample("t2", false)).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let header_count = content
            .lines()
            .filter(|l| l.starts_with("task_id,"))
            .count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let mut metric = sample("t1", false);
        metric.error_message = Some("InactivityTimeout".to_string());
        log.record(&metric).unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task_id, "t1");
        assert_eq!(rows[0].role, Role::Coder);
        assert_eq!(rows[0].execution_mode, ExecutionMode::Full);
        assert_eq!(
            rows[0].error_message.as_deref(),
            Some("InactivityTimeout")
        );
        assert!(!rows[0].success);
    }

    #[test]
    fn test_error_message_with_commas_and_quotes_survives() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let mut metric = sample("t1", false);
        metric.error_message = Some("child said \"401, Unauthorized\"".to_string());
        log.record(&metric).unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(
            rows[0].error_message.as_deref(),
            Some("child said \"401, Unauthorized\"")
        );
    }

    #[test]
    fn test_summary_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.record(&sample("t1", true)).unwrap();
        log.record(&sample("t2", false)).unwrap();
        log.record(&sample("t3", true)).unwrap();

        let summary = log.summary().unwrap();
        assert_eq!(summary.total_runs, 3);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.total_input_tokens, 300);
        assert!((summary.success_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recent_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        for i in 0..5 {
            log.record(&sample(&format!("t{i}"), true)).unwrap();
        }

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task_id, "t3");
        assert_eq!(recent[1].task_id, "t4");
    }

    #[test]
    fn test_reader_skips_torn_row() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.record(&sample("t1", true)).unwrap();

        // Simulate a concurrent writer caught mid-append.
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(b"torn,row,without,enough").unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task_id, "t1");
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.summary().unwrap(), MetricsSummary::default());
    }

    #[test]
    fn test_export_json_is_an_array_of_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.record(&sample("t1", true)).unwrap();
        log.record(&sample("t2", false)).unwrap();

        let export = log.export_json().unwrap();
        let rows = export.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["task_id"], "t1");
        assert_eq!(rows[1]["success"], false);
    }
}
