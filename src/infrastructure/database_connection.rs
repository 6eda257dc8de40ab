// Database connection and pool management
// Handles SQLite connections using sqlx and bootstraps the schema.

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

use crate::infrastructure::table::TableSpec;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        // Create database file and parent directory if they don't exist
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the execution log table and every entity table in `specs`.
    pub async fn migrate(&self, specs: &[TableSpec]) -> Result<()> {
        let create_execution_log_sql = r#"
            CREATE TABLE IF NOT EXISTS execution_log (
                execution_id TEXT PRIMARY KEY,
                execution_type TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                started_at TEXT,
                ended_at TEXT,
                duration_seconds REAL,
                status TEXT NOT NULL,
                error_message TEXT,
                tables_processed TEXT
            )
        "#;
        sqlx::query(create_execution_log_sql)
            .execute(&self.pool)
            .await?;

        for spec in specs {
            for sql in spec.create_table_sql() {
                sqlx::query(&sql).execute(&self.pool).await?;
            }
        }

        Ok(())
    }
}
