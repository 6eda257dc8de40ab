//! Infrastructure layer for database access, remote API clients, and
//! external integrations
//!
//! Everything that touches a socket or a file lives here; the application
//! layer only sees the trait seams (`ListSource`, `TableHandle`).

pub mod config;
pub mod database_connection;
pub mod execution_log_repository;
pub mod fetcher;
pub mod http_client;
pub mod logging;
pub mod sql_source;
pub mod table;

pub use config::AppConfig;
pub use database_connection::DatabaseConnection;
pub use execution_log_repository::ExecutionLogRepository;
pub use fetcher::{FetchError, FetchPlan, ListSource, PaginatedFetcher, PaginationMode};
pub use http_client::{ApiClient, ApiClientConfig};
pub use logging::{init_logging, init_logging_with_file};
pub use sql_source::SqlSource;
pub use table::{ColumnSpec, ColumnType, Filter, SqlTable, TableError, TableHandle, TableSpec};
