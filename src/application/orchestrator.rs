//! Bounded-concurrency task orchestration
//!
//! Runs a named set of independently-failing load tasks in sequential
//! batches of at most `max_concurrency` parallel workers, and persists one
//! execution log entry per run: once with `status = running` before the
//! first batch, once with the terminal status after the last. Worker
//! failures are captured per task and never stop siblings or later batches;
//! only failures of the orchestrator's own bookkeeping abort the run.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use futures::future::BoxFuture;
use tracing::{error, info};

use crate::domain::execution_log::{ExecutionLogEntry, ExecutionStatus};
use crate::domain::pipeline_run::PipelineRun;
use crate::infrastructure::execution_log_repository::ExecutionLogRepository;

/// Aggregated error text is capped at this many characters, matching the
/// execution log column budget.
const ERROR_MESSAGE_LIMIT: usize = 1000;

/// One schedulable unit of work.
pub struct TaskSpec {
    pub name: String,
    future: BoxFuture<'static, Result<PipelineRun>>,
}

impl TaskSpec {
    pub fn new(
        name: impl Into<String>,
        future: impl std::future::Future<Output = Result<PipelineRun>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            future: Box::pin(future),
        }
    }
}

/// Everything a caller can learn about a finished run. Worker results and
/// errors travel back through join handles and are merged here after the
/// last batch; workers share no mutable state.
pub struct RunOutcome {
    pub entry: ExecutionLogEntry,
    pub results: Vec<(String, PipelineRun)>,
    pub errors: Vec<(String, String)>,
}

pub struct TaskOrchestrator {
    repository: ExecutionLogRepository,
    max_concurrency: usize,
}

impl TaskOrchestrator {
    pub fn new(repository: ExecutionLogRepository, max_concurrency: usize) -> Self {
        Self {
            repository,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Persists the `running` entry for a run that is about to start.
    ///
    /// Split from [`execute`](Self::execute) so the HTTP layer can hand the
    /// execution id to the caller before the background work begins.
    pub async fn begin(
        &self,
        execution_type: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<ExecutionLogEntry> {
        let entry = ExecutionLogEntry::begin(execution_type, start_date, end_date);
        self.repository
            .create_running(&entry)
            .await
            .context("orchestrator bookkeeping failed at run start")?;
        Ok(entry)
    }

    /// Runs `tasks` to completion and finalizes `entry`.
    pub async fn execute(
        &self,
        mut entry: ExecutionLogEntry,
        tasks: Vec<TaskSpec>,
    ) -> Result<RunOutcome> {
        let task_names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        info!(
            execution_id = %entry.execution_id,
            execution_type = %entry.execution_type,
            n_tasks = tasks.len(),
            max_concurrency = self.max_concurrency,
            "starting orchestrated run"
        );

        let mut results: Vec<(String, PipelineRun)> = Vec::new();
        let mut errors: Vec<(String, String)> = Vec::new();

        let mut remaining = tasks;
        while !remaining.is_empty() {
            let batch: Vec<TaskSpec> = remaining
                .drain(..self.max_concurrency.min(remaining.len()))
                .collect();

            let handles: Vec<(String, tokio::task::JoinHandle<Result<PipelineRun>>)> = batch
                .into_iter()
                .map(|task| (task.name, tokio::spawn(task.future)))
                .collect();

            // Block until every worker in the batch finishes before the
            // next batch starts.
            for (name, handle) in handles {
                match handle.await {
                    Ok(Ok(run)) => {
                        info!(task = %name, n_inserted = run.n_inserted, n_updated = run.n_updated, "task finished");
                        results.push((name, run));
                    }
                    Ok(Err(e)) => {
                        error!(task = %name, error = %e, "task failed");
                        errors.push((name, e.to_string()));
                    }
                    Err(join_error) => {
                        error!(task = %name, error = %join_error, "task panicked");
                        errors.push((name, format!("worker panicked: {join_error}")));
                    }
                }
            }
        }

        let ended_at = Utc::now();
        entry.ended_at = Some(ended_at);
        entry.duration_seconds =
            Some((ended_at - entry.started_at).num_milliseconds() as f64 / 1000.0);
        entry.status = if errors.is_empty() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };
        entry.error_message = aggregate_errors(&errors);
        entry.tables_processed = Some(task_names.join(", "));

        self.repository
            .finalize(&entry)
            .await
            .context("orchestrator bookkeeping failed at run end")?;

        info!(
            execution_id = %entry.execution_id,
            status = entry.status.as_str(),
            n_ok = results.len(),
            n_failed = errors.len(),
            "orchestrated run finished"
        );
        Ok(RunOutcome {
            entry,
            results,
            errors,
        })
    }

    /// `begin` + `execute` in one call, for synchronous callers and tests.
    pub async fn run(
        &self,
        execution_type: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        tasks: Vec<TaskSpec>,
    ) -> Result<RunOutcome> {
        let entry = self.begin(execution_type, start_date, end_date).await?;
        self.execute(entry, tasks).await
    }
}

fn aggregate_errors(errors: &[(String, String)]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let joined = errors
        .iter()
        .map(|(name, message)| format!("{name}: {message}"))
        .collect::<Vec<_>>()
        .join("; ");
    Some(joined.chars().take(ERROR_MESSAGE_LIMIT).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn orchestrator(max_concurrency: usize) -> TaskOrchestrator {
        let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap();
        db.migrate(&[]).await.unwrap();
        TaskOrchestrator::new(
            ExecutionLogRepository::new(db.pool().clone()),
            max_concurrency,
        )
    }

    fn window() -> (NaiveDate, NaiveDate) {
        let d = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        (d, d)
    }

    fn ok_task(name: &str) -> TaskSpec {
        TaskSpec::new(name, async {
            let mut run = PipelineRun::start();
            run.n_inserted = 1;
            run.finish();
            Ok(run)
        })
    }

    #[tokio::test]
    async fn one_failing_task_does_not_stop_the_others() {
        let orch = orchestrator(1).await;
        let (start, end) = window();

        let tasks = vec![
            ok_task("load_groups"),
            TaskSpec::new("load_sys_user", async {
                anyhow::bail!("API error: 500 - internal")
            }),
            ok_task("load_sys_company"),
        ];

        let outcome = orch.run("configurations", start, end, tasks).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, "load_sys_user");
        assert_eq!(outcome.entry.status, ExecutionStatus::Error);
        let message = outcome.entry.error_message.unwrap();
        assert!(message.contains("load_sys_user"));
        assert!(message.contains("API error: 500"));
        assert_eq!(
            outcome.entry.tables_processed.as_deref(),
            Some("load_groups, load_sys_user, load_sys_company")
        );
    }

    #[tokio::test]
    async fn all_tasks_succeeding_marks_success() {
        let orch = orchestrator(2).await;
        let (start, end) = window();

        let outcome = orch
            .run("configurations", start, end, vec![ok_task("a"), ok_task("b")])
            .await
            .unwrap();
        assert_eq!(outcome.entry.status, ExecutionStatus::Success);
        assert!(outcome.entry.error_message.is_none());
        assert!(outcome.entry.duration_seconds.is_some());
        assert!(outcome.entry.ended_at.is_some());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_cap() {
        let orch = orchestrator(2).await;
        let (start, end) = window();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<TaskSpec> = (0..6)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                TaskSpec::new(format!("task_{i}"), async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(PipelineRun::start())
                })
            })
            .collect();

        let outcome = orch.run("batched", start, end, tasks).await.unwrap();
        assert_eq!(outcome.results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        // Workers within a batch do run in parallel.
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_worker_is_captured_as_error() {
        let orch = orchestrator(2).await;
        let (start, end) = window();

        let tasks = vec![
            TaskSpec::new("panics", async { panic!("boom") }),
            ok_task("survives"),
        ];

        let outcome = orch.run("mixed", start, end, tasks).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.entry.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn error_message_is_truncated() {
        let orch = orchestrator(1).await;
        let (start, end) = window();

        let long = "x".repeat(5000);
        let tasks = vec![TaskSpec::new("noisy", async move {
            anyhow::bail!("{long}")
        })];

        let outcome = orch.run("t", start, end, tasks).await.unwrap();
        assert_eq!(outcome.entry.error_message.unwrap().chars().count(), 1000);
    }
}
