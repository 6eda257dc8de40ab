//! Incremental upsert by natural key
//!
//! One keyed lookup decides which records already exist; new keys become a
//! batched insert, known keys become merge-updates (only the fields present
//! in the incoming record are overwritten). Everything runs in a single
//! transaction, and the whole batch rolls back on any failure.

use tracing::{info, warn};

use crate::application::load_pipeline::PipelineError;
use crate::domain::pipeline_run::PipelineRun;
use crate::domain::record::{key_value, Record};
use crate::infrastructure::table::TableHandle;

pub struct UpsertEngine {
    pool: sqlx::SqlitePool,
    chunk_size: usize,
    actor: String,
}

impl UpsertEngine {
    pub fn new(pool: sqlx::SqlitePool, chunk_size: usize, actor: impl Into<String>) -> Self {
        Self {
            pool,
            chunk_size,
            actor: actor.into(),
        }
    }

    /// Inserts or merge-updates `records` into `table`, matching on the
    /// table's natural key.
    ///
    /// Records without a usable natural key value are dropped up front and
    /// reported in `n_skipped`; they count as neither inserted nor updated.
    /// Applying the same batch twice yields the same final rows, with the
    /// second call reporting `n_inserted = 0`.
    pub async fn upsert(
        &self,
        records: &[Record],
        table: &dyn TableHandle,
    ) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::start();
        let key_field = table.natural_key();

        let mut keyed: Vec<(String, &Record)> = Vec::with_capacity(records.len());
        for record in records {
            match key_value(record, key_field) {
                Some(key) => keyed.push((key, record)),
                None => run.n_skipped += 1,
            }
        }
        if run.n_skipped > 0 {
            warn!(
                table = table.name(),
                n_skipped = run.n_skipped,
                "records dropped for missing natural key"
            );
        }

        let save_started = std::time::Instant::now();
        let mut tx = self.pool.begin().await?;

        let keys: Vec<String> = keyed.iter().map(|(k, _)| k.clone()).collect();
        let existing = table.find_by_keys(tx.as_mut(), &keys).await?;

        let mut to_insert: Vec<Record> = Vec::new();
        let mut to_update: Vec<Record> = Vec::new();
        for (key, record) in keyed {
            if existing.contains_key(&key) {
                to_update.push(record.clone());
            } else {
                to_insert.push(record.clone());
            }
        }

        run.n_inserted = table
            .insert_many(tx.as_mut(), &to_insert, &self.actor, self.chunk_size)
            .await?;
        if !to_update.is_empty() {
            run.n_updated = table
                .update_many(tx.as_mut(), &to_update, &self.actor, self.chunk_size)
                .await?;
        }

        tx.commit().await?;
        run.save_duration = save_started.elapsed().as_secs_f64();
        run.finish();

        info!(
            table = table.name(),
            n_inserted = run.n_inserted,
            n_updated = run.n_updated,
            n_skipped = run.n_skipped,
            "upsert finished"
        );
        Ok(run)
    }
}
