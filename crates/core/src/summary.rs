//! Per-run batch job summaries
//!
//! Every batch job emits one of these regardless of how many rows it had
//! to skip; skipped units never fail a run.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Outcome counters for one batch job invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job: String,
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub elapsed_ms: u64,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn new(job: &str) -> Self {
        RunSummary {
            job: job.to_string(),
            ..RunSummary::default()
        }
    }

    /// Stamp the elapsed time from a job-start instant
    pub fn finish(mut self, started: Instant) -> Self {
        self.elapsed_ms = started.elapsed().as_millis() as u64;
        self
    }

    /// Emit the summary through the structured log
    pub fn log(&self) {
        info!(
            job = %self.job,
            processed = self.processed,
            updated = self.updated,
            skipped = self.skipped,
            elapsed_ms = self.elapsed_ms,
            dry_run = self.dry_run,
            "run summary"
        );
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: processed={} updated={} skipped={} elapsed={}ms{}",
            self.job,
            self.processed,
            self.updated,
            self.skipped,
            self.elapsed_ms,
            if self.dry_run { " (dry run)" } else { "" }
        )
    }
}
