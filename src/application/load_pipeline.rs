//! Full-refresh load: delete by filter, then bulk insert
//!
//! Used when the remote is authoritative for a filtered slice of the table
//! (e.g. "all incidents opened in the window"). Both steps run inside one
//! transaction, so a failed insert also rolls back the delete and the table
//! is left exactly as it was.

use std::time::Instant;

use thiserror::Error;
use tracing::info;

use crate::domain::pipeline_run::PipelineRun;
use crate::domain::record::Record;
use crate::infrastructure::table::{Filter, TableError, TableHandle};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("transaction failed: {0}")]
    Transaction(#[from] sqlx::Error),
}

pub struct LoadPipeline {
    pool: sqlx::SqlitePool,
    chunk_size: usize,
    actor: String,
}

impl LoadPipeline {
    pub fn new(pool: sqlx::SqlitePool, chunk_size: usize, actor: impl Into<String>) -> Self {
        Self {
            pool,
            chunk_size,
            actor: actor.into(),
        }
    }

    /// Replaces the filtered slice of `table` with `records`.
    ///
    /// The insert performs no per-row existence checks: the delete step is
    /// assumed to have cleared every conflicting row. An empty `records` is
    /// not an error; the slice is simply deleted.
    pub async fn load(
        &self,
        records: &[Record],
        table: &dyn TableHandle,
        delete_filter: &Filter,
    ) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::start();
        let mut tx = self.pool.begin().await?;

        let delete_started = Instant::now();
        run.n_deleted = table.delete_where(tx.as_mut(), delete_filter).await?;
        run.delete_duration = delete_started.elapsed().as_secs_f64();

        let save_started = Instant::now();
        run.n_inserted = table
            .insert_many(tx.as_mut(), records, &self.actor, self.chunk_size)
            .await?;
        run.save_duration = save_started.elapsed().as_secs_f64();

        tx.commit().await?;
        run.finish();

        info!(
            table = table.name(),
            n_deleted = run.n_deleted,
            n_inserted = run.n_inserted,
            delete_duration = run.delete_duration,
            save_duration = run.save_duration,
            "load finished"
        );
        Ok(run)
    }
}
