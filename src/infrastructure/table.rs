//! Explicit table descriptions and batched SQL operations
//!
//! Entity tables are described by an explicit [`TableSpec`] (name, typed
//! column list, natural key) instead of runtime model reflection. All write
//! paths go through the [`TableHandle`] trait so the load/upsert engines can
//! stay generic over the target table; the shipped implementation is
//! [`SqlTable`] over sqlx/SQLite. Callers own the transaction scope and pass
//! the connection in.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use thiserror::Error;
use tracing::debug;

use crate::domain::record::{key_value, Record};

/// Audit columns appended to every entity table. Filled from the explicit
/// `actor` passed into each write call, never from ambient state.
pub const ETL_CREATED_AT: &str = "etl_created_at";
pub const ETL_UPDATED_AT: &str = "etl_updated_at";
pub const ETL_ACTOR: &str = "etl_actor";

/// Keys per IN-list chunk, kept well under SQLite's bind parameter cap.
const KEY_LOOKUP_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("database error on table '{table}': {source}")]
    Sql {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// A filter or update referenced a column the table does not declare.
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },
}

/// Storage type of a column. ServiceNow-style payloads are almost entirely
/// strings; numeric columns appear in SQL-sourced fact tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ColumnType::Text,
        }
    }

    pub fn integer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ColumnType::Integer,
        }
    }

    pub fn real(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ColumnType::Real,
        }
    }
}

/// Explicit description of one entity table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    /// The external system's stable identifier field, used for upsert
    /// matching. Not the storage primary key.
    pub natural_key: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: &str, natural_key: &str, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.to_string(),
            natural_key: natural_key.to_string(),
            columns,
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// DDL for the table plus a lookup index on the natural key. Audit
    /// columns are appended automatically.
    pub fn create_table_sql(&self) -> Vec<String> {
        let mut cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ty.sql_type()))
            .collect();
        cols.push(format!("{ETL_CREATED_AT} TEXT"));
        cols.push(format!("{ETL_UPDATED_AT} TEXT"));
        cols.push(format!("{ETL_ACTOR} TEXT"));

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                self.name,
                cols.join(", ")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                self.name, self.natural_key, self.name, self.natural_key
            ),
        ]
    }
}

/// Row filter for deletes and SQL-source reads.
///
/// Deleting everything is a deliberate, spelled-out variant: full-refresh
/// tables rely on it, and it must never fall out of an accidentally empty
/// filter map.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every row.
    All,
    /// Conjunction of column = value terms.
    Equals(Vec<(String, Value)>),
    /// Inclusive range on one column.
    Between {
        column: String,
        start: String,
        end: String,
    },
}

/// Batched operations against one table. Implementations must not manage
/// transactions themselves; the caller passes a connection that is already
/// inside (or outside) a transaction scope.
#[async_trait]
pub trait TableHandle: Send + Sync {
    fn name(&self) -> &str;

    fn natural_key(&self) -> &str;

    /// Inserts `records` in chunks of `chunk_size` rows. Fields without a
    /// declared column are ignored; declared columns absent from a record
    /// are stored as NULL. Returns the number of rows inserted.
    async fn insert_many(
        &self,
        conn: &mut SqliteConnection,
        records: &[Record],
        actor: &str,
        chunk_size: usize,
    ) -> Result<u64, TableError>;

    /// Merge-updates one row per record, matched on the natural key. Only
    /// fields present in the incoming record are overwritten; everything
    /// else on the existing row is left untouched. Returns the number of
    /// rows updated.
    async fn update_many(
        &self,
        conn: &mut SqliteConnection,
        records: &[Record],
        actor: &str,
        chunk_size: usize,
    ) -> Result<u64, TableError>;

    /// Fetches existing rows whose natural key is in `keys`, as a map from
    /// key value to row.
    async fn find_by_keys(
        &self,
        conn: &mut SqliteConnection,
        keys: &[String],
    ) -> Result<HashMap<String, Record>, TableError>;

    /// Deletes all rows matching `filter`, returning the count.
    async fn delete_where(
        &self,
        conn: &mut SqliteConnection,
        filter: &Filter,
    ) -> Result<u64, TableError>;
}

/// [`TableHandle`] over a [`TableSpec`] using raw sqlx queries.
#[derive(Debug, Clone)]
pub struct SqlTable {
    spec: TableSpec,
}

impl SqlTable {
    pub fn new(spec: TableSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn sql_error(&self, source: sqlx::Error) -> TableError {
        TableError::Sql {
            table: self.spec.name.clone(),
            source,
        }
    }

    fn check_column(&self, column: &str) -> Result<(), TableError> {
        if self.spec.has_column(column) {
            Ok(())
        } else {
            Err(TableError::UnknownColumn {
                table: self.spec.name.clone(),
                column: column.to_string(),
            })
        }
    }

    /// Decodes a row into a [`Record`] following the declared column types.
    pub fn row_to_record(spec: &TableSpec, row: &SqliteRow) -> Result<Record, sqlx::Error> {
        let mut record = Record::new();
        for col in &spec.columns {
            let value = match col.ty {
                ColumnType::Text => row
                    .try_get::<Option<String>, _>(col.name.as_str())?
                    .map_or(Value::Null, Value::String),
                ColumnType::Integer => row
                    .try_get::<Option<i64>, _>(col.name.as_str())?
                    .map_or(Value::Null, Value::from),
                ColumnType::Real => row
                    .try_get::<Option<f64>, _>(col.name.as_str())?
                    .map_or(Value::Null, Value::from),
            };
            record.insert(col.name.clone(), value);
        }
        Ok(record)
    }
}

/// Pushes a JSON scalar as a bind parameter.
fn push_bind_value<'a>(
    separated: &mut sqlx::query_builder::Separated<'_, 'a, Sqlite, &'static str>,
    value: Option<&Value>,
) {
    match value {
        None | Some(Value::Null) => {
            separated.push_bind(None::<String>);
        }
        Some(Value::Bool(b)) => {
            separated.push_bind(i64::from(*b));
        }
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                separated.push_bind(i);
            } else {
                separated.push_bind(n.as_f64().unwrap_or_default());
            }
        }
        Some(Value::String(s)) => {
            separated.push_bind(s.clone());
        }
        // Flattening upstream guarantees scalars; anything else is stored
        // as its JSON text.
        Some(other) => {
            separated.push_bind(other.to_string());
        }
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: Option<&Value>,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        None | Some(Value::Null) => query.bind(None::<String>),
        Some(Value::Bool(b)) => query.bind(i64::from(*b)),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or_default())
            }
        }
        Some(Value::String(s)) => query.bind(s.clone()),
        Some(other) => query.bind(other.to_string()),
    }
}

#[async_trait]
impl TableHandle for SqlTable {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn natural_key(&self) -> &str {
        &self.spec.natural_key
    }

    async fn insert_many(
        &self,
        conn: &mut SqliteConnection,
        records: &[Record],
        actor: &str,
        chunk_size: usize,
    ) -> Result<u64, TableError> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let column_names: Vec<&str> = self
            .spec
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .chain([ETL_CREATED_AT, ETL_UPDATED_AT, ETL_ACTOR])
            .collect();

        let mut inserted = 0u64;
        for chunk in records.chunks(chunk_size.max(1)) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                self.spec.name,
                column_names.join(", ")
            ));
            builder.push_values(chunk, |mut row, record| {
                for col in &self.spec.columns {
                    push_bind_value(&mut row, record.get(&col.name));
                }
                row.push_bind(now.clone());
                row.push_bind(now.clone());
                row.push_bind(actor.to_string());
            });

            let result = builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(|e| self.sql_error(e))?;
            inserted += result.rows_affected();
        }

        debug!(table = %self.spec.name, inserted, "insert_many");
        Ok(inserted)
    }

    async fn update_many(
        &self,
        conn: &mut SqliteConnection,
        records: &[Record],
        actor: &str,
        chunk_size: usize,
    ) -> Result<u64, TableError> {
        let key = &self.spec.natural_key;
        let now = Utc::now().to_rfc3339();

        let mut updated = 0u64;
        for chunk in records.chunks(chunk_size.max(1)) {
            for record in chunk {
                let Some(key_val) = key_value(record, key) else {
                    continue;
                };

                // Overwrite only declared fields the record actually
                // carries (merge, not replace).
                let fields: Vec<&str> = self
                    .spec
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .filter(|name| *name != key && record.contains_key(*name))
                    .collect();

                let mut assignments: Vec<String> =
                    fields.iter().map(|f| format!("{f} = ?")).collect();
                assignments.push(format!("{ETL_UPDATED_AT} = ?"));
                assignments.push(format!("{ETL_ACTOR} = ?"));

                let sql = format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    self.spec.name,
                    assignments.join(", "),
                    key
                );

                let mut query = sqlx::query(&sql);
                for field in &fields {
                    query = bind_value(query, record.get(*field));
                }
                query = query.bind(now.clone()).bind(actor.to_string()).bind(key_val);

                let result = query
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| self.sql_error(e))?;
                updated += result.rows_affected();
            }
        }

        debug!(table = %self.spec.name, updated, "update_many");
        Ok(updated)
    }

    async fn find_by_keys(
        &self,
        conn: &mut SqliteConnection,
        keys: &[String],
    ) -> Result<HashMap<String, Record>, TableError> {
        let mut existing = HashMap::new();
        if keys.is_empty() {
            return Ok(existing);
        }

        let column_names: Vec<&str> = self.spec.columns.iter().map(|c| c.name.as_str()).collect();

        for chunk in keys.chunks(KEY_LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM {} WHERE {} IN (",
                column_names.join(", "),
                self.spec.name,
                self.spec.natural_key
            ));
            let mut separated = builder.separated(", ");
            for key in chunk {
                separated.push_bind(key.clone());
            }
            separated.push_unseparated(")");

            let rows = builder
                .build()
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| self.sql_error(e))?;

            for row in rows {
                let record =
                    Self::row_to_record(&self.spec, &row).map_err(|e| self.sql_error(e))?;
                if let Some(key_val) = key_value(&record, &self.spec.natural_key) {
                    existing.insert(key_val, record);
                }
            }
        }

        Ok(existing)
    }

    async fn delete_where(
        &self,
        conn: &mut SqliteConnection,
        filter: &Filter,
    ) -> Result<u64, TableError> {
        let result = match filter {
            Filter::All => {
                let sql = format!("DELETE FROM {}", self.spec.name);
                sqlx::query(&sql).execute(&mut *conn).await
            }
            Filter::Equals(terms) => {
                for (column, _) in terms {
                    self.check_column(column)?;
                }
                let clauses: Vec<String> =
                    terms.iter().map(|(c, _)| format!("{c} = ?")).collect();
                let sql = format!(
                    "DELETE FROM {} WHERE {}",
                    self.spec.name,
                    clauses.join(" AND ")
                );
                let mut query = sqlx::query(&sql);
                for (_, value) in terms {
                    query = bind_value(query, Some(value));
                }
                query.execute(&mut *conn).await
            }
            Filter::Between { column, start, end } => {
                self.check_column(column)?;
                let sql = format!(
                    "DELETE FROM {} WHERE {column} >= ? AND {column} <= ?",
                    self.spec.name
                );
                sqlx::query(&sql)
                    .bind(start)
                    .bind(end)
                    .execute(&mut *conn)
                    .await
            }
        }
        .map_err(|e| self.sql_error(e))?;

        debug!(table = %self.spec.name, deleted = result.rows_affected(), "delete_where");
        Ok(result.rows_affected())
    }
}
