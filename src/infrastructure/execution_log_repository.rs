//! Persistence for [`ExecutionLogEntry`] rows
//!
//! The orchestrator writes each entry exactly twice: once when the run
//! starts (`create_running`) and once when it ends (`finalize`). Workers
//! never touch this table.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::execution_log::{ExecutionLogEntry, ExecutionStatus};

#[derive(Clone)]
pub struct ExecutionLogRepository {
    pool: SqlitePool,
}

impl ExecutionLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists a fresh entry with `status = running`.
    pub async fn create_running(&self, entry: &ExecutionLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_log
            (execution_id, execution_type, start_date, end_date, started_at, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.execution_id.to_string())
        .bind(&entry.execution_type)
        .bind(entry.start_date.to_string())
        .bind(entry.end_date.to_string())
        .bind(entry.started_at.to_rfc3339())
        .bind(entry.status.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to persist execution log entry")?;
        Ok(())
    }

    /// The single terminal update of a run's entry.
    pub async fn finalize(&self, entry: &ExecutionLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE execution_log
            SET ended_at = ?, duration_seconds = ?, status = ?, error_message = ?, tables_processed = ?
            WHERE execution_id = ?
            "#,
        )
        .bind(entry.ended_at.map(|t| t.to_rfc3339()))
        .bind(entry.duration_seconds)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(&entry.tables_processed)
        .bind(entry.execution_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to finalize execution log entry")?;
        Ok(())
    }

    pub async fn get(&self, execution_id: Uuid) -> Result<Option<ExecutionLogEntry>> {
        let row = sqlx::query(
            r#"
            SELECT execution_id, execution_type, start_date, end_date, started_at,
                   ended_at, duration_seconds, status, error_message, tables_processed
            FROM execution_log
            WHERE execution_id = ?
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read execution log entry")?;

        row.map(|row| -> Result<ExecutionLogEntry> {
            let started_at: String = row.get("started_at");
            let ended_at: Option<String> = row.get("ended_at");
            let status: String = row.get("status");
            Ok(ExecutionLogEntry {
                execution_id: row.get::<String, _>("execution_id").parse()?,
                execution_type: row.get("execution_type"),
                start_date: row.get::<String, _>("start_date").parse::<NaiveDate>()?,
                end_date: row.get::<String, _>("end_date").parse::<NaiveDate>()?,
                started_at: started_at.parse::<DateTime<Utc>>()?,
                ended_at: ended_at
                    .map(|t| t.parse::<DateTime<Utc>>())
                    .transpose()?,
                duration_seconds: row.get("duration_seconds"),
                status: status
                    .parse::<ExecutionStatus>()
                    .map_err(anyhow::Error::msg)?,
                error_message: row.get("error_message"),
                tables_processed: row.get("tables_processed"),
            })
        })
        .transpose()
    }
}
