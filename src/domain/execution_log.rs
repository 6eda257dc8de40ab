//! Persisted summary of one orchestrated batch run

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an orchestrated run. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One row of the `execution_log` table.
///
/// Created with `status = running` when an orchestrated run begins and
/// updated exactly once when it ends. Only the orchestrator writes it;
/// workers never touch this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub execution_id: Uuid,
    pub execution_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub tables_processed: Option<String>,
}

impl ExecutionLogEntry {
    /// A fresh entry for a run that is about to start.
    pub fn begin(execution_type: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            execution_type: execution_type.to_string(),
            start_date,
            end_date,
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            status: ExecutionStatus::Running,
            error_message: None,
            tables_processed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>(), Ok(status));
        }
        assert!("pending".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn begin_starts_running_without_end() {
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let entry = ExecutionLogEntry::begin("incidents", start, start);
        assert_eq!(entry.status, ExecutionStatus::Running);
        assert!(entry.ended_at.is_none());
        assert!(entry.error_message.is_none());
    }
}
