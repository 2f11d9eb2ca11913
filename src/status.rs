use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::cache::format_date;
use crate::domain::ProcessingState;
use crate::fs_util::{now_local, write_bytes_atomic};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unsupported: usize,
    pub directories_checked: usize,
    pub aborted: bool,
}

impl ScanSummary {
    pub fn record(&mut self, state: ProcessingState) {
        match state {
            ProcessingState::ProcessedSuccessfully => self.processed += 1,
            ProcessingState::SkippedSinceFoundInCache => self.skipped += 1,
            ProcessingState::FailedProcessing => self.failed += 1,
            ProcessingState::NotProcessed => {}
        }
    }

    /// Paths handed to a processor or answered from the cache.
    pub fn matched(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    Complete,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: RunState,
    pub percent_complete: f32,
    pub current_item: Option<String>,
    pub started_at: String,
    pub updated_at: String,
    pub summary: ScanSummary,
}

/// Keeps the run's counters and mirrors them to an optional JSON status
/// file, rewritten at most once per interval.
pub struct StatusWriter {
    path: Option<PathBuf>,
    interval: Duration,
    last_written: Option<Instant>,
    report: StatusReport,
}

impl StatusWriter {
    pub fn new(path: Option<PathBuf>, interval: Duration) -> Self {
        let now = format_date(now_local());
        Self {
            path,
            interval,
            last_written: None,
            report: StatusReport {
                state: RunState::Starting,
                percent_complete: 0.0,
                current_item: None,
                started_at: now.clone(),
                updated_at: now,
                summary: ScanSummary::default(),
            },
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, Duration::MAX)
    }

    pub fn report(&self) -> &StatusReport {
        &self.report
    }

    pub fn summary(&self) -> &ScanSummary {
        &self.report.summary
    }

    pub fn summary_mut(&mut self) -> &mut ScanSummary {
        &mut self.report.summary
    }

    pub fn begin_item(&mut self, path: &Path) {
        self.report.state = RunState::Running;
        self.report.current_item = Some(path.display().to_string());
    }

    pub fn set_progress(&mut self, done: usize, total: usize) {
        self.report.percent_complete = if total == 0 {
            100.0
        } else {
            (done as f32 / total as f32 * 100.0).min(100.0)
        };
    }

    /// Writes the status file when the interval has elapsed since the last write.
    pub fn maybe_write(&mut self) {
        let due = self
            .last_written
            .is_none_or(|last| last.elapsed() >= self.interval);
        if due {
            self.write();
        }
    }

    pub fn finish(&mut self, state: RunState) {
        self.report.state = state;
        self.report.current_item = None;
        if state == RunState::Complete {
            self.report.percent_complete = 100.0;
        }
        self.write();
    }

    fn write(&mut self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        self.report.updated_at = format_date(now_local());
        self.last_written = Some(Instant::now());

        let result = serde_json::to_vec_pretty(&self.report)
            .map_err(std::io::Error::other)
            .and_then(|bytes| write_bytes_atomic(path, &bytes));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "failed to write status file");
        }
    }
}
