//! End-to-end loading tests: fetch -> flatten -> load/upsert -> execution log

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Mutex;

use itsm_sync::application::catalog;
use itsm_sync::application::load_pipeline::LoadPipeline;
use itsm_sync::application::orchestrator::{TaskOrchestrator, TaskSpec};
use itsm_sync::application::upsert_engine::UpsertEngine;
use itsm_sync::domain::execution_log::ExecutionStatus;
use itsm_sync::domain::record::Record;
use itsm_sync::infrastructure::database_connection::DatabaseConnection;
use itsm_sync::infrastructure::execution_log_repository::ExecutionLogRepository;
use itsm_sync::infrastructure::fetcher::{FetchError, FetchPlan, ListSource, PaginatedFetcher};
use itsm_sync::infrastructure::table::{Filter, SqlTable, TableHandle};

/// In-memory paged source standing in for the remote list endpoint.
struct PagedSource {
    pages: Mutex<Vec<Vec<Record>>>,
}

impl PagedSource {
    fn new(pages: Vec<Vec<Record>>) -> Self {
        Self {
            pages: Mutex::new(pages),
        }
    }
}

#[async_trait]
impl ListSource for PagedSource {
    async fn fetch_page(
        &self,
        _path: &str,
        _params: &[(String, String)],
    ) -> Result<Vec<Record>, FetchError> {
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(pages.remove(0))
        }
    }
}

fn incident_record(id: &str, group: &str) -> Record {
    json!({
        "sys_id": id,
        "number": format!("INC_{id}"),
        "opened_at": "2025-06-01 08:00:00",
        "assignment_group": {"value": group, "display_value": format!("Group {group}")},
    })
    .as_object()
    .cloned()
    .unwrap()
}

async fn fresh_db(dir: &tempfile::TempDir) -> DatabaseConnection {
    let url = format!("sqlite://{}", dir.path().join("sync.db").display());
    let db = DatabaseConnection::with_max_connections(&url, 5)
        .await
        .unwrap();
    db.migrate(&catalog::all_specs()).await.unwrap();
    db
}

#[tokio::test]
async fn fetched_references_land_flattened_in_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let db = fresh_db(&dir).await;

    let source = PagedSource::new(vec![
        vec![incident_record("i1", "g1"), incident_record("i2", "g1")],
        vec![incident_record("i3", "g2")],
    ]);
    let records = PaginatedFetcher::new(&source)
        .fetch(&FetchPlan::offset("incident", 2))
        .await
        .unwrap();
    assert_eq!(records.len(), 3);

    let table = SqlTable::new(catalog::incident());
    let pipeline = LoadPipeline::new(db.pool().clone(), 1000, "itest");
    let run = pipeline
        .load(&records, &table, &Filter::All)
        .await
        .unwrap();
    assert_eq!(run.n_inserted, 3);

    let mut conn = db.pool().acquire().await.unwrap();
    let existing = table
        .find_by_keys(&mut conn, &["i1".to_string()])
        .await
        .unwrap();
    assert_eq!(existing["i1"]["assignment_group"], json!("g1"));
    assert_eq!(existing["i1"]["dv_assignment_group"], json!("Group g1"));
}

#[tokio::test]
async fn orchestrated_run_mixes_replace_upsert_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let db = fresh_db(&dir).await;
    let pool = db.pool().clone();

    // Concurrency 1 keeps the two writer transactions from contending on
    // the same SQLite file; parallel workers are covered by the
    // orchestrator's own tests.
    let repository = ExecutionLogRepository::new(pool.clone());
    let orchestrator = TaskOrchestrator::new(repository.clone(), 1);

    let replace_pool = pool.clone();
    let upsert_pool = pool.clone();
    let tasks = vec![
        TaskSpec::new("load_incidents_opened", async move {
            let source = PagedSource::new(vec![vec![
                incident_record("i1", "g1"),
                incident_record("i2", "g2"),
            ]]);
            let records = PaginatedFetcher::new(&source)
                .fetch(&FetchPlan::offset("incident", 100))
                .await?;
            let table = SqlTable::new(catalog::incident());
            LoadPipeline::new(replace_pool, 1000, "itest")
                .load(&records, &table, &Filter::All)
                .await
                .map_err(Into::into)
        }),
        TaskSpec::new("load_incidents_updated", async move {
            let source = PagedSource::new(vec![vec![incident_record("i2", "g9")]]);
            let records = PaginatedFetcher::new(&source)
                .fetch(&FetchPlan::offset("incident", 100))
                .await?;
            let table = SqlTable::new(catalog::incident());
            UpsertEngine::new(upsert_pool, 1000, "itest")
                .upsert(&records, &table)
                .await
                .map_err(Into::into)
        }),
        TaskSpec::new("load_sys_user", async {
            Err(FetchError::Http {
                status: 502,
                body: "bad gateway".to_string(),
            }
            .into())
        }),
    ];

    let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let outcome = orchestrator
        .run("incidents", date, date, tasks)
        .await
        .unwrap();

    // The failing task ran, was captured, and stopped nothing.
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.entry.status, ExecutionStatus::Error);

    // Batches are sequential: the replace landed first, then the upsert
    // merged the fresher group onto i2.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incident")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);

    let table = SqlTable::new(catalog::incident());
    let mut conn = pool.acquire().await.unwrap();
    let existing = table
        .find_by_keys(&mut conn, &["i2".to_string()])
        .await
        .unwrap();
    assert_eq!(existing["i2"]["assignment_group"], json!("g9"));
    drop(conn);

    // The persisted entry reflects the terminal state.
    let stored = repository
        .get(outcome.entry.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Error);
    assert!(stored
        .error_message
        .unwrap()
        .contains("load_sys_user"));
}

#[tokio::test]
async fn warehouse_fact_rebuilds_from_landed_incidents() {
    let dir = tempfile::tempdir().unwrap();
    let db = fresh_db(&dir).await;
    let pool = db.pool().clone();

    // Land two incidents the fact rebuild will read back.
    let landed: Vec<Record> = vec![incident_record("i1", "g1"), incident_record("i2", "g2")]
        .into_iter()
        .map(itsm_sync::domain::record::flatten_record)
        .collect();
    let incidents = SqlTable::new(catalog::incident());
    LoadPipeline::new(pool.clone(), 1000, "itest")
        .load(&landed, &incidents, &Filter::All)
        .await
        .unwrap();

    let api = itsm_sync::infrastructure::http_client::ApiClient::new(
        itsm_sync::infrastructure::http_client::ApiClientConfig::default(),
    )
    .unwrap();
    let ctx = itsm_sync::application::context::AppContext::new(
        pool.clone(),
        api,
        itsm_sync::infrastructure::config::AppConfig::default(),
    );

    let repository = ExecutionLogRepository::new(pool.clone());
    let orchestrator = TaskOrchestrator::new(repository, 1);
    let window = itsm_sync::application::catalog::DateWindow::resolve(
        Some("2025-06-01"),
        Some("2025-06-01"),
    )
    .unwrap();

    let outcome = orchestrator
        .run(
            "warehouse",
            window.start,
            window.end,
            catalog::warehouse_tasks(&ctx, &window),
        )
        .await
        .unwrap();
    assert_eq!(outcome.entry.status, ExecutionStatus::Success);
    assert_eq!(outcome.results.len(), 1);

    // The fact slice mirrors the landed incidents, dv_ columns included.
    let fact = SqlTable::new(catalog::f_incident());
    let mut conn = pool.acquire().await.unwrap();
    let rows = fact
        .find_by_keys(&mut conn, &["i1".to_string(), "i2".to_string()])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows["i2"]["dv_assignment_group"], json!("Group g2"));

    // A second rebuild of the same window replaces, not duplicates.
    drop(conn);
    let outcome = orchestrator
        .run(
            "warehouse",
            window.start,
            window.end,
            catalog::warehouse_tasks(&ctx, &window),
        )
        .await
        .unwrap();
    assert_eq!(outcome.results[0].1.n_deleted, 2);
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM f_incident")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}
