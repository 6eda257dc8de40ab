//! Configuration infrastructure
//!
//! Settings are organized per concern (remote source, database, server,
//! orchestrator) with serde defaults, loaded from an optional JSON file and
//! overridable through `ITSM_SYNC__*` environment variables. Remote
//! credentials are expected to come from the environment only.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Remote API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,

    /// Request timeout in seconds. Mandatory by design: the orchestrator
    /// relies on the client timing out rather than configuring its own.
    pub timeout_seconds: u64,

    pub max_requests_per_second: u32,

    /// Records requested per page.
    pub page_size: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: 30,
            max_requests_per_second: 5,
            page_size: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,

    /// Rows per batched insert/update call.
    pub batch_chunk_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/itsm_sync.db".to_string(),
            max_connections: 10,
            batch_chunk_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on workers running in parallel within one batch.
    pub max_concurrency: usize,

    /// Audit identity recorded on every write.
    pub actor: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            actor: "itsm-sync".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `config/itsm_sync.json` (when present) and
    /// the environment. `ITSM_SYNC__SOURCE__PASSWORD=...` style variables
    /// override file values.
    pub fn load() -> Result<Self> {
        Self::load_from(Some("config/itsm_sync"))
    }

    pub fn load_from(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ITSM_SYNC")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to assemble configuration sources")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
