//! Logging system configuration and initialization
//!
//! Console logging via `tracing-subscriber` with an `EnvFilter` (RUST_LOG
//! wins over the configured default), plus optional daily-rotated file
//! output under `logs/`.

use anyhow::Result;
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

// Keeps the non-blocking file writer alive for the process lifetime.
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

pub fn get_log_directory() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_default()
        .join("logs")
}

/// Initializes console logging only.
pub fn init_logging() -> Result<()> {
    init_logging_with_file(false)
}

/// Initializes console logging, optionally teeing into a daily log file.
pub fn init_logging_with_file(file_output: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    if file_output {
        let appender = rolling::daily(get_log_directory(), "itsm-sync.log");
        let (writer, guard) = non_blocking(appender);
        if let Ok(mut guards) = LOG_GUARDS.lock() {
            guards.push(guard);
        }

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);

        Registry::default()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(console_layer)
            .try_init()?;
    }

    Ok(())
}
