//! Entity catalog and task wiring
//!
//! Explicit column definitions for every synced table (the remote's field
//! schemas are hundreds of columns wide; the catalog carries the subset this
//! warehouse consumes) plus the builders that turn a date window into the
//! orchestrator's task list. Reference fields keep their flattened `dv_`
//! companion as an extra column.

use chrono::{Duration, Local, NaiveDate};

use crate::application::context::AppContext;
use crate::application::load_pipeline::LoadPipeline;
use crate::application::orchestrator::TaskSpec;
use crate::application::upsert_engine::UpsertEngine;
use crate::domain::record::key_value;
use crate::infrastructure::table::TableHandle;
use crate::infrastructure::fetcher::{FetchPlan, PaginatedFetcher};
use crate::infrastructure::sql_source::SqlSource;
use crate::infrastructure::table::{ColumnSpec, Filter, SqlTable, TableSpec};

/// Inclusive date window bounding every extraction query.
#[derive(Debug, Clone, Copy)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Yesterday, the default window of scheduled runs.
    pub fn yesterday() -> Self {
        let day = (Local::now() - Duration::days(1)).date_naive();
        Self {
            start: day,
            end: day,
        }
    }

    /// Resolves optional `YYYY-MM-DD` strings, defaulting each missing
    /// bound to yesterday.
    pub fn resolve(start: Option<&str>, end: Option<&str>) -> Result<Self, chrono::ParseError> {
        let fallback = Self::yesterday();
        Ok(Self {
            start: start
                .map(str::parse::<NaiveDate>)
                .transpose()?
                .unwrap_or(fallback.start),
            end: end
                .map(str::parse::<NaiveDate>)
                .transpose()?
                .unwrap_or(fallback.end),
        })
    }

    fn start_ts(&self) -> String {
        ensure_datetime(&self.start.to_string(), false)
    }

    fn end_ts(&self) -> String {
        ensure_datetime(&self.end.to_string(), true)
    }
}

/// Widens a bare `YYYY-MM-DD` date to a full timestamp: start of day, or
/// end of day when `end` is set. Full timestamps pass through unchanged.
pub fn ensure_datetime(s: &str, end: bool) -> String {
    if s.len() == 10 {
        if end {
            format!("{s} 23:59:59")
        } else {
            format!("{s} 00:00:00")
        }
    } else {
        s.to_string()
    }
}

/// Encoded remote query bounding `field` to the window.
fn window_query(field: &str, window: &DateWindow) -> String {
    format!(
        "{field}>={start}^{field}<={end}",
        start = window.start_ts(),
        end = window.end_ts()
    )
}

/// Remote field list for a spec: declared columns minus the locally
/// generated `dv_` companions (the remote materializes those itself when
/// the reference is flattened).
fn fields_param(spec: &TableSpec) -> String {
    spec.columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| !name.starts_with("dv_"))
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Table specs
// ---------------------------------------------------------------------------

pub fn incident() -> TableSpec {
    TableSpec::new(
        "incident",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("number"),
            ColumnSpec::text("opened_at"),
            ColumnSpec::text("closed_at"),
            ColumnSpec::text("sys_updated_on"),
            ColumnSpec::text("state"),
            ColumnSpec::text("priority"),
            ColumnSpec::text("short_description"),
            ColumnSpec::text("assignment_group"),
            ColumnSpec::text("dv_assignment_group"),
            ColumnSpec::text("caller_id"),
            ColumnSpec::text("dv_caller_id"),
            ColumnSpec::text("company"),
            ColumnSpec::text("dv_company"),
            ColumnSpec::integer("reassignment_count"),
        ],
    )
}

pub fn task_sla() -> TableSpec {
    TableSpec::new(
        "task_sla",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("task"),
            ColumnSpec::text("dv_task"),
            ColumnSpec::text("sla"),
            ColumnSpec::text("dv_sla"),
            ColumnSpec::text("stage"),
            ColumnSpec::text("start_time"),
            ColumnSpec::text("end_time"),
            ColumnSpec::text("business_percentage"),
            ColumnSpec::text("has_breached"),
            ColumnSpec::text("sys_created_on"),
        ],
    )
}

pub fn sys_user() -> TableSpec {
    TableSpec::new(
        "sys_user",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("user_name"),
            ColumnSpec::text("name"),
            ColumnSpec::text("email"),
            ColumnSpec::text("department"),
            ColumnSpec::text("dv_department"),
            ColumnSpec::text("company"),
            ColumnSpec::text("dv_company"),
            ColumnSpec::text("active"),
        ],
    )
}

pub fn sys_company() -> TableSpec {
    TableSpec::new(
        "sys_company",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("name"),
            ColumnSpec::text("street"),
            ColumnSpec::text("city"),
            ColumnSpec::text("country"),
            ColumnSpec::text("customer"),
        ],
    )
}

pub fn sys_user_group() -> TableSpec {
    TableSpec::new(
        "sys_user_group",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("name"),
            ColumnSpec::text("description"),
            ColumnSpec::text("manager"),
            ColumnSpec::text("dv_manager"),
            ColumnSpec::text("active"),
        ],
    )
}

pub fn cmdb_ci_network_link() -> TableSpec {
    TableSpec::new(
        "cmdb_ci_network_link",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("name"),
            ColumnSpec::text("u_link_id"),
            ColumnSpec::text("u_provider"),
            ColumnSpec::text("dv_u_provider"),
            ColumnSpec::text("install_status"),
            ColumnSpec::text("location"),
            ColumnSpec::text("dv_location"),
        ],
    )
}

/// Warehouse fact table rebuilt from landed incidents, not from the
/// remote. Every column must exist on `incident`.
pub fn f_incident() -> TableSpec {
    TableSpec::new(
        "f_incident",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("number"),
            ColumnSpec::text("opened_at"),
            ColumnSpec::text("closed_at"),
            ColumnSpec::text("state"),
            ColumnSpec::text("priority"),
            ColumnSpec::text("assignment_group"),
            ColumnSpec::text("dv_assignment_group"),
            ColumnSpec::text("company"),
            ColumnSpec::text("dv_company"),
            ColumnSpec::integer("reassignment_count"),
        ],
    )
}

/// Every table the schema bootstrap must create.
pub fn all_specs() -> Vec<TableSpec> {
    vec![
        incident(),
        task_sla(),
        sys_user(),
        sys_company(),
        sys_user_group(),
        cmdb_ci_network_link(),
        f_incident(),
    ]
}

// ---------------------------------------------------------------------------
// Task builders
// ---------------------------------------------------------------------------

/// Fetch the window's slice from the remote and replace the whole table.
fn replace_task(
    ctx: &AppContext,
    name: &str,
    spec: TableSpec,
    date_field: &str,
    window: &DateWindow,
) -> TaskSpec {
    let plan = FetchPlan::offset(spec.name.clone(), ctx.config.source.page_size)
        .with_param("sysparm_query", window_query(date_field, window))
        .with_param("sysparm_fields", fields_param(&spec));
    let api = ctx.api.clone();
    let pipeline = LoadPipeline::new(
        ctx.pool.clone(),
        ctx.config.database.batch_chunk_size,
        ctx.config.orchestrator.actor.clone(),
    );

    TaskSpec::new(name, async move {
        let records = PaginatedFetcher::new(api.as_ref()).fetch(&plan).await?;
        let table = SqlTable::new(spec);
        pipeline
            .load(&records, &table, &Filter::All)
            .await
            .map_err(Into::into)
    })
}

/// Fetch the window's slice (or everything, without a window) and upsert it
/// by natural key.
fn upsert_task(
    ctx: &AppContext,
    name: &str,
    spec: TableSpec,
    date_field: Option<(&str, &DateWindow)>,
) -> TaskSpec {
    let mut plan = FetchPlan::offset(spec.name.clone(), ctx.config.source.page_size)
        .with_param("sysparm_fields", fields_param(&spec));
    if let Some((field, window)) = date_field {
        plan = plan.with_param("sysparm_query", window_query(field, window));
    }
    let api = ctx.api.clone();
    let engine = UpsertEngine::new(
        ctx.pool.clone(),
        ctx.config.database.batch_chunk_size,
        ctx.config.orchestrator.actor.clone(),
    );

    TaskSpec::new(name, async move {
        let records = PaginatedFetcher::new(api.as_ref()).fetch(&plan).await?;
        let table = SqlTable::new(spec);
        engine.upsert(&records, &table).await.map_err(Into::into)
    })
}

/// Rebuild the window's slice of a warehouse table from rows already
/// landed in `source_table`, projecting onto the target's columns.
fn rebuild_task(
    ctx: &AppContext,
    name: &str,
    target: TableSpec,
    source_table: &str,
    date_column: &str,
    window: &DateWindow,
) -> TaskSpec {
    let projection = TableSpec::new(source_table, &target.natural_key, target.columns.clone());
    let filter = Filter::Between {
        column: date_column.to_string(),
        start: window.start_ts(),
        end: window.end_ts(),
    };
    let pool = ctx.pool.clone();
    let pipeline = LoadPipeline::new(
        ctx.pool.clone(),
        ctx.config.database.batch_chunk_size,
        ctx.config.orchestrator.actor.clone(),
    );

    TaskSpec::new(name, async move {
        let records = SqlSource::new(pool).fetch(&projection, &filter).await?;
        let table = SqlTable::new(target);
        pipeline
            .load(&records, &table, &filter)
            .await
            .map_err(Into::into)
    })
}

/// Parent incidents referenced by the window's SLA rows may predate the
/// window; fetch the missing ones individually and merge them in.
fn enrich_sla_parents_task(ctx: &AppContext, window: &DateWindow) -> TaskSpec {
    let projection = TableSpec::new(
        "task_sla",
        "sys_id",
        vec![
            ColumnSpec::text("sys_id"),
            ColumnSpec::text("task"),
            ColumnSpec::text("sys_created_on"),
        ],
    );
    let filter = Filter::Between {
        column: "sys_created_on".to_string(),
        start: window.start_ts(),
        end: window.end_ts(),
    };
    let pool = ctx.pool.clone();
    let api = ctx.api.clone();
    let engine = UpsertEngine::new(
        ctx.pool.clone(),
        ctx.config.database.batch_chunk_size,
        ctx.config.orchestrator.actor.clone(),
    );

    TaskSpec::new("enrich_sla_parent_incidents", async move {
        let sla_rows = SqlSource::new(pool.clone()).fetch(&projection, &filter).await?;
        let mut parent_ids: Vec<String> = sla_rows
            .iter()
            .filter_map(|row| key_value(row, "task"))
            .collect();
        parent_ids.sort();
        parent_ids.dedup();

        let table = SqlTable::new(incident());
        let mut conn = pool.acquire().await?;
        let existing = table.find_by_keys(&mut conn, &parent_ids).await?;
        drop(conn);

        let mut fetched = Vec::new();
        for id in parent_ids.iter().filter(|id| !existing.contains_key(*id)) {
            if let Some(record) = api.fetch_one("incident", id).await? {
                fetched.push(record);
            }
        }
        engine.upsert(&fetched, &table).await.map_err(Into::into)
    })
}

/// Incident tasks: the opened-in-window slice is authoritative and replaces
/// the table; records merely updated in the window are merged by key. The
/// enrichment task lands in a later batch, after the SLA rows it reads.
pub fn incident_tasks(ctx: &AppContext, window: &DateWindow) -> Vec<TaskSpec> {
    vec![
        replace_task(ctx, "load_incidents_opened", incident(), "opened_at", window),
        upsert_task(
            ctx,
            "load_incidents_updated",
            incident(),
            Some(("sys_updated_on", window)),
        ),
        upsert_task(
            ctx,
            "load_incident_sla_updated",
            task_sla(),
            Some(("sys_created_on", window)),
        ),
        enrich_sla_parents_task(ctx, window),
    ]
}

/// Warehouse tasks: fact slices rebuilt from already-landed rows.
pub fn warehouse_tasks(ctx: &AppContext, window: &DateWindow) -> Vec<TaskSpec> {
    vec![rebuild_task(
        ctx,
        "load_f_incident",
        f_incident(),
        "incident",
        "opened_at",
        window,
    )]
}

/// Configuration tasks: reference entities are small and unwindowed, pulled
/// whole and merged by key.
pub fn configuration_tasks(ctx: &AppContext) -> Vec<TaskSpec> {
    vec![
        upsert_task(ctx, "load_sys_user", sys_user(), None),
        upsert_task(ctx, "load_sys_company", sys_company(), None),
        upsert_task(ctx, "load_groups", sys_user_group(), None),
        upsert_task(
            ctx,
            "load_cmdb_ci_network_link",
            cmdb_ci_network_link(),
            None,
        ),
    ]
}
