//! Domain module - core entities and value objects
//!
//! Flat records, per-invocation run bookkeeping, and the persisted
//! execution log entry. No I/O lives here.

pub mod execution_log;
pub mod pipeline_run;
pub mod record;

pub use execution_log::{ExecutionLogEntry, ExecutionStatus};
pub use pipeline_run::PipelineRun;
pub use record::{flatten_record, key_value, Record, DISPLAY_VALUE_PREFIX};
