//! Per-invocation bookkeeping for load and upsert operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters and timings for a single pipeline or upsert invocation.
///
/// Created when the operation starts, filled in as its steps run, and folded
/// into the execution log by the orchestrator once the owning task finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub n_deleted: u64,
    pub n_inserted: u64,
    pub n_updated: u64,
    /// Records dropped because the natural key field was missing or empty.
    pub n_skipped: u64,
    /// Wall-clock seconds spent in the delete step.
    pub delete_duration: f64,
    /// Wall-clock seconds spent in the insert/update step.
    pub save_duration: f64,
}

impl PipelineRun {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            n_deleted: 0,
            n_inserted: 0,
            n_updated: 0,
            n_skipped: 0,
            delete_duration: 0.0,
            save_duration: 0.0,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Total duration in seconds, when the run has finished.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at.map(|end| {
            (end - self.started_at).num_milliseconds() as f64 / 1000.0
        })
    }
}
