//! HTTP trigger routes
//!
//! Thin layer over the orchestrator: `POST /load-incidents` and
//! `POST /load-configurations` (and `POST /load-warehouse` for fact
//! rebuilds) persist the running execution log entry,
//! spawn the batch in the background and answer `202 accepted` immediately
//! with the execution id. Callers poll `GET /executions/{id}` for the final
//! status; failures that happen after the 202 are only visible there.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::application::catalog::{self, DateWindow};
use crate::application::context::AppContext;
use crate::application::orchestrator::{TaskOrchestrator, TaskSpec};
use crate::infrastructure::execution_log_repository::ExecutionLogRepository;

#[derive(Clone)]
pub struct ApiState {
    pub ctx: AppContext,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub repository: ExecutionLogRepository,
}

impl ApiState {
    pub fn new(ctx: AppContext) -> Self {
        let repository = ExecutionLogRepository::new(ctx.pool.clone());
        let orchestrator = Arc::new(TaskOrchestrator::new(
            repository.clone(),
            ctx.config.orchestrator.max_concurrency,
        ));
        Self {
            ctx,
            orchestrator,
            repository,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/load-incidents", post(load_incidents))
        .route("/load-configurations", post(load_configurations))
        .route("/load-warehouse", post(load_warehouse))
        .route("/executions/{id}", get(get_execution))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct WindowParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn load_incidents(
    State(state): State<ApiState>,
    body: Option<Json<WindowParams>>,
) -> Response {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    let window = match resolve_window(&params) {
        Ok(window) => window,
        Err(response) => return response,
    };
    let tasks = catalog::incident_tasks(&state.ctx, &window);
    accept_run(state, "incidents", window, tasks).await
}

async fn load_configurations(
    State(state): State<ApiState>,
    body: Option<Json<WindowParams>>,
) -> Response {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    let window = match resolve_window(&params) {
        Ok(window) => window,
        Err(response) => return response,
    };
    let tasks = catalog::configuration_tasks(&state.ctx);
    accept_run(state, "configurations", window, tasks).await
}

async fn load_warehouse(
    State(state): State<ApiState>,
    body: Option<Json<WindowParams>>,
) -> Response {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    let window = match resolve_window(&params) {
        Ok(window) => window,
        Err(response) => return response,
    };
    let tasks = catalog::warehouse_tasks(&state.ctx, &window);
    accept_run(state, "warehouse", window, tasks).await
}

fn resolve_window(params: &WindowParams) -> Result<DateWindow, Response> {
    DateWindow::resolve(params.start_date.as_deref(), params.end_date.as_deref()).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("invalid date: {e}")})),
        )
            .into_response()
    })
}

/// Persists the running entry, hands the work to a background task, and
/// answers 202 with the execution id for polling.
async fn accept_run(
    state: ApiState,
    execution_type: &str,
    window: DateWindow,
    tasks: Vec<TaskSpec>,
) -> Response {
    let entry = match state
        .orchestrator
        .begin(execution_type, window.start, window.end)
        .await
    {
        Ok(entry) => entry,
        Err(e) => {
            error!(error = %e, "failed to start orchestrated run");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let execution_id = entry.execution_id;
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.execute(entry, tasks).await {
            error!(%execution_id, error = %e, "orchestrated run failed fatally");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "message": "Processing started in background",
            "execution_id": execution_id,
        })),
    )
        .into_response()
}

async fn get_execution(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.repository.get(id).await {
        Ok(Some(entry)) => Json(entry).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown execution id"})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to read execution log");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
