//! Run progress reporting.
//!
//! The pipeline emits events through the `ProgressReporter` trait; the
//! markdown sink folds them into an append-only run report (header, current
//! item, cumulative stats, one row per target, trailing event log) and
//! rewrites the report file on every event so an operator can follow a run
//! live.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Most events the log keeps in memory; only the tail is rendered.
const MAX_EVENTS: usize = 200;
const RENDERED_EVENTS: usize = 100;

/// One row in the per-target table.
#[derive(Debug, Clone, Default)]
pub struct ReportRow {
    pub county: String,
    pub state: String,
    pub date_start: String,
    pub date_end: String,
    pub job_id: String,
    pub action: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: String,
    pub created: u32,
    pub updated: u32,
    pub qualified: u32,
    pub disqualified: u32,
    pub error: String,
}

/// Cumulative run statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub started: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub created: u32,
    pub updated: u32,
    pub qualified: u32,
    pub disqualified: u32,
}

/// Static header information for a run.
#[derive(Debug, Clone, Default)]
pub struct RunHeader {
    pub state: String,
    pub job_type: String,
    pub range_start: String,
    pub range_end: String,
    pub chunk_days: u32,
    pub dry_run: bool,
    pub total_targets: usize,
}

/// Events emitted while a run progresses.
pub enum ProgressEvent {
    RunStarted(RunHeader),
    /// The item currently being processed; empty clears the line.
    Current(String),
    /// Upserts a row (keyed by job id) in the target table.
    Row(ReportRow),
    Stats(RunStats),
    /// Appends a timestamped line to the event log.
    Event(String),
    RunFinished,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and quiet runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Accumulated state of one run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub header: RunHeader,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub current: String,
    pub stats: RunStats,
    pub rows: Vec<ReportRow>,
    pub events: Vec<String>,
}

fn fmt_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn escape_pipes(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ").trim().to_string()
}

fn dash_if_empty(text: &str) -> &str {
    if text.is_empty() {
        "-"
    } else {
        text
    }
}

impl RunReport {
    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted(header) => {
                self.header = header;
                self.started_at = Some(Utc::now());
            }
            ProgressEvent::Current(label) => self.current = label,
            ProgressEvent::Row(row) => {
                match self
                    .rows
                    .iter_mut()
                    .find(|r| !row.job_id.is_empty() && r.job_id == row.job_id)
                {
                    Some(existing) => *existing = row,
                    None => self.rows.push(row),
                }
            }
            ProgressEvent::Stats(stats) => self.stats = stats,
            ProgressEvent::Event(message) => {
                let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
                self.events.push(format!("{} - {}", stamp, message));
                if self.events.len() > MAX_EVENTS {
                    let excess = self.events.len() - MAX_EVENTS;
                    self.events.drain(0..excess);
                }
            }
            ProgressEvent::RunFinished => {
                self.current.clear();
                self.finished_at = Some(Utc::now());
            }
        }
    }

    /// Renders the report as markdown.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        lines.push("# Scrape Run Progress".to_string());
        lines.push(String::new());
        lines.push("## Run".to_string());
        lines.push(format!("- Started: {}", fmt_time(self.started_at)));
        lines.push(format!("- Finished: {}", fmt_time(self.finished_at)));
        lines.push(format!("- State: `{}`", dash_if_empty(&self.header.state)));
        lines.push(format!(
            "- Doc Type: `{}`",
            dash_if_empty(&self.header.job_type)
        ));
        lines.push(format!(
            "- Date Range: `{}` to `{}`",
            dash_if_empty(&self.header.range_start),
            dash_if_empty(&self.header.range_end)
        ));
        lines.push(format!("- Chunk Days: `{}`", self.header.chunk_days));
        lines.push(format!("- Dry Run: `{}`", self.header.dry_run));
        lines.push(String::new());
        lines.push("## Current".to_string());
        lines.push(format!("- Processing: {}", dash_if_empty(&self.current)));
        lines.push(String::new());
        lines.push("## Stats".to_string());
        lines.push(format!("- Targets: `{}`", self.header.total_targets));
        lines.push(format!("- Started Jobs: `{}`", self.stats.started));
        lines.push(format!("- Completed Jobs: `{}`", self.stats.completed));
        lines.push(format!("- Failed Jobs: `{}`", self.stats.failed));
        lines.push(format!("- Skipped Jobs: `{}`", self.stats.skipped));
        lines.push(format!("- Prospects Created: `{}`", self.stats.created));
        lines.push(format!("- Prospects Updated: `{}`", self.stats.updated));
        lines.push(format!("- Prospects Qualified: `{}`", self.stats.qualified));
        lines.push(format!(
            "- Prospects Disqualified: `{}`",
            self.stats.disqualified
        ));
        lines.push(String::new());
        lines.push("## Job Rows".to_string());
        lines.push(
            "| County | State | Start | End | Job ID | Action | Status | Start Time | End Time \
             | Created | Updated | Qualified | Disqualified | Error |"
                .to_string(),
        );
        lines.push("|---|---|---|---|---|---|---|---|---|---:|---:|---:|---:|---|".to_string());
        for row in &self.rows {
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                row.county,
                row.state,
                row.date_start,
                row.date_end,
                dash_if_empty(&row.job_id),
                dash_if_empty(&row.action),
                row.status,
                dash_if_empty(&row.started_at),
                dash_if_empty(&row.ended_at),
                row.created,
                row.updated,
                row.qualified,
                row.disqualified,
                dash_if_empty(&escape_pipes(&row.error)),
            ));
        }
        lines.push(String::new());
        lines.push("## Event Log".to_string());
        let start = self.events.len().saturating_sub(RENDERED_EVENTS);
        for event in &self.events[start..] {
            lines.push(format!("- {}", event));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

/// Markdown-file progress sink. The whole file is rewritten on each event;
/// events themselves are only ever appended.
pub struct MarkdownProgress {
    report: Mutex<RunReport>,
    path: PathBuf,
}

impl MarkdownProgress {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            report: Mutex::new(RunReport::default()),
            path: path.as_ref().to_path_buf(),
        }
    }

    fn write(&self, rendered: &str) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, rendered) {
            log::warn!("Failed to write progress report {}: {}", self.path.display(), e);
        }
    }
}

impl ProgressReporter for MarkdownProgress {
    fn report(&self, event: ProgressEvent) {
        let rendered = match self.report.lock() {
            Ok(mut report) => {
                report.apply(event);
                report.render()
            }
            Err(_) => return,
        };
        self.write(&rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(job_id: &str, status: &str) -> ReportRow {
        ReportRow {
            county: "Miami-Dade".to_string(),
            state: "FL".to_string(),
            date_start: "2026-06-01".to_string(),
            date_end: "2026-06-07".to_string(),
            job_id: job_id.to_string(),
            action: "created".to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_report_renders_sections() {
        let mut report = RunReport::default();
        report.apply(ProgressEvent::RunStarted(RunHeader {
            state: "FL".to_string(),
            job_type: "TD".to_string(),
            range_start: "2026-06-01".to_string(),
            range_end: "2026-06-07".to_string(),
            chunk_days: 7,
            dry_run: false,
            total_targets: 1,
        }));
        report.apply(ProgressEvent::Current("[1/1] Miami-Dade".to_string()));
        report.apply(ProgressEvent::Row(sample_row("job-1", "running")));
        report.apply(ProgressEvent::Event("Processing Miami-Dade".to_string()));

        let rendered = report.render();
        assert!(rendered.contains("# Scrape Run Progress"));
        assert!(rendered.contains("- State: `FL`"));
        assert!(rendered.contains("- Processing: [1/1] Miami-Dade"));
        assert!(rendered.contains("| Miami-Dade | FL |"));
        assert!(rendered.contains("Processing Miami-Dade"));
    }

    #[test]
    fn test_row_upsert_by_job_id() {
        let mut report = RunReport::default();
        report.apply(ProgressEvent::Row(sample_row("job-1", "running")));
        report.apply(ProgressEvent::Row(sample_row("job-1", "completed")));
        report.apply(ProgressEvent::Row(sample_row("job-2", "running")));

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].status, "completed");
    }

    #[test]
    fn test_event_log_is_capped() {
        let mut report = RunReport::default();
        for i in 0..250 {
            report.apply(ProgressEvent::Event(format!("event {}", i)));
        }
        assert_eq!(report.events.len(), MAX_EVENTS);
        // Oldest entries were dropped; the newest survive.
        assert!(report.events.last().unwrap().contains("event 249"));
        assert!(!report.events.iter().any(|e| e.contains("event 0 ")));
    }

    #[test]
    fn test_run_finished_clears_current() {
        let mut report = RunReport::default();
        report.apply(ProgressEvent::Current("working".to_string()));
        report.apply(ProgressEvent::RunFinished);
        assert!(report.current.is_empty());
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_markdown_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.md");
        let sink = MarkdownProgress::new(&path);

        sink.report(ProgressEvent::Event("hello".to_string()));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("hello"));
    }

    #[test]
    fn test_pipe_escaping_in_error_column() {
        let mut report = RunReport::default();
        let mut row = sample_row("job-1", "failed");
        row.error = "bad | pipe".to_string();
        report.apply(ProgressEvent::Row(row));
        assert!(report.render().contains("bad \\| pipe"));
    }
}
