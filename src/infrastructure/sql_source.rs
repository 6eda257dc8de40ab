//! Extraction from a linked SQL table
//!
//! Some loads are fed from a local warehouse table instead of the remote
//! API (e.g. fact tables rebuilt from previously landed dimensions). This
//! source runs a single column-projected SELECT and converts the rows into
//! flat [`Record`]s. No pagination: the caller bounds the result with the
//! filter.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::domain::record::Record;
use crate::infrastructure::table::{Filter, SqlTable, TableError, TableSpec};

pub struct SqlSource {
    pool: SqlitePool,
}

impl SqlSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reads every row of `spec`'s table matching `filter`, projected onto
    /// the declared columns.
    pub async fn fetch(&self, spec: &TableSpec, filter: &Filter) -> Result<Vec<Record>, TableError> {
        let columns: Vec<&str> = spec.columns.iter().map(|c| c.name.as_str()).collect();
        let select = format!("SELECT {} FROM {}", columns.join(", "), spec.name);

        let sql_error = |source: sqlx::Error| TableError::Sql {
            table: spec.name.clone(),
            source,
        };

        let rows = match filter {
            Filter::All => {
                sqlx::query(&select).fetch_all(&self.pool).await
            }
            Filter::Equals(terms) => {
                for (column, _) in terms {
                    if !spec.has_column(column) {
                        return Err(TableError::UnknownColumn {
                            table: spec.name.clone(),
                            column: column.clone(),
                        });
                    }
                }
                let clauses: Vec<String> =
                    terms.iter().map(|(c, _)| format!("{c} = ?")).collect();
                let sql = format!("{select} WHERE {}", clauses.join(" AND "));
                let mut query = sqlx::query(&sql);
                for (_, value) in terms {
                    query = match value {
                        Value::Null => query.bind(None::<String>),
                        Value::Bool(b) => query.bind(i64::from(*b)),
                        Value::Number(n) => match n.as_i64() {
                            Some(i) => query.bind(i),
                            None => query.bind(n.as_f64().unwrap_or_default()),
                        },
                        Value::String(s) => query.bind(s.clone()),
                        other => query.bind(other.to_string()),
                    };
                }
                query.fetch_all(&self.pool).await
            }
            Filter::Between { column, start, end } => {
                if !spec.has_column(column) {
                    return Err(TableError::UnknownColumn {
                        table: spec.name.clone(),
                        column: column.clone(),
                    });
                }
                let sql = format!("{select} WHERE {column} >= ? AND {column} <= ?");
                sqlx::query(&sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(sql_error)?;

        rows.iter()
            .map(|row| SqlTable::row_to_record(spec, row).map_err(sql_error))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::table::{ColumnSpec, TableHandle};
    use serde_json::json;

    #[tokio::test]
    async fn fetch_projects_and_filters() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let spec = TableSpec::new(
            "incident",
            "sys_id",
            vec![
                ColumnSpec::text("sys_id"),
                ColumnSpec::text("state"),
                ColumnSpec::text("opened_at"),
            ],
        );
        let table = SqlTable::new(spec.clone());
        for sql in spec.create_table_sql() {
            sqlx::query(&sql).execute(&pool).await.unwrap();
        }
        {
            let mut conn = pool.acquire().await.unwrap();
            let records: Vec<Record> = (0..3)
                .map(|i| {
                    json!({
                        "sys_id": format!("s{i}"),
                        "state": if i == 0 { "open" } else { "closed" },
                        "opened_at": format!("2025-06-0{} 10:00:00", i + 1),
                    })
                    .as_object()
                    .cloned()
                    .unwrap()
                })
                .collect();
            table
                .insert_many(&mut conn, &records, "tester", 1000)
                .await
                .unwrap();
        }

        let source = SqlSource::new(pool);
        let all = source.fetch(&spec, &Filter::All).await.unwrap();
        assert_eq!(all.len(), 3);

        let closed = source
            .fetch(
                &spec,
                &Filter::Equals(vec![("state".to_string(), json!("closed"))]),
            )
            .await
            .unwrap();
        assert_eq!(closed.len(), 2);

        let windowed = source
            .fetch(
                &spec,
                &Filter::Between {
                    column: "opened_at".to_string(),
                    start: "2025-06-01 00:00:00".to_string(),
                    end: "2025-06-02 23:59:59".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(windowed.len(), 2);
    }
}
