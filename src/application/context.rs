//! Shared handles for task construction

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::ApiClient;

/// Everything a load task needs: the shared pool, the remote API client
/// and the effective configuration. Cheap to clone; tasks capture a clone.
#[derive(Clone)]
pub struct AppContext {
    pub pool: SqlitePool,
    pub api: Arc<ApiClient>,
    pub config: Arc<AppConfig>,
}

impl AppContext {
    pub fn new(pool: SqlitePool, api: ApiClient, config: AppConfig) -> Self {
        Self {
            pool,
            api: Arc::new(api),
            config: Arc::new(config),
        }
    }
}
