//! Service entry point: configuration, schema bootstrap, HTTP trigger.

use anyhow::{Context, Result};
use tracing::info;

use itsm_sync::api::{router, ApiState};
use itsm_sync::application::catalog;
use itsm_sync::application::context::AppContext;
use itsm_sync::infrastructure::config::AppConfig;
use itsm_sync::infrastructure::database_connection::DatabaseConnection;
use itsm_sync::infrastructure::http_client::{ApiClient, ApiClientConfig};
use itsm_sync::infrastructure::logging::init_logging_with_file;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging_with_file(true)?;

    let config = AppConfig::load()?;
    info!(bind = %config.server.bind, database = %config.database.url, "starting itsm-sync");

    let db = DatabaseConnection::with_max_connections(
        &config.database.url,
        config.database.max_connections,
    )
    .await?;
    db.migrate(&catalog::all_specs()).await?;

    let api = ApiClient::new(ApiClientConfig {
        base_url: config.source.base_url.clone(),
        username: config.source.username.clone(),
        password: config.source.password.clone(),
        timeout_seconds: config.source.timeout_seconds,
        max_requests_per_second: config.source.max_requests_per_second,
        ..ApiClientConfig::default()
    })?;

    let bind = config.server.bind.clone();
    let ctx = AppContext::new(db.pool().clone(), api, config);
    let app = router(ApiState::new(ctx));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("listening on {bind}");
    axum::serve(listener, app).await.context("server failed")?;

    Ok(())
}
