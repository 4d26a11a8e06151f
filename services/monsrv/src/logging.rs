//! Logging setup for monsrv
//!
//! Console output always; an optional daily-rolling file sink when
//! `service.log_file` is set. The returned guard must be kept alive for
//! the file writer to flush.

use crate::config::ServiceConfig;
use crate::error::{MonsrvError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize logging from the service configuration
pub fn init(config: &ServiceConfig) -> Result<Option<WorkerGuard>> {
    let mut layers = Vec::new();
    let mut guard = None;

    // Console layer
    let env_filter = EnvFilter::try_new(&config.log_level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| MonsrvError::ConfigError(format!("invalid log level: {}", e)))?;
    let console_layer = fmt::layer().compact().with_target(true);
    layers.push(console_layer.with_filter(env_filter).boxed());

    // File layer
    if let Some(file_path) = &config.log_file {
        let env_filter = EnvFilter::try_new(&config.log_level)
            .or_else(|_| EnvFilter::try_new("info"))
            .map_err(|e| MonsrvError::ConfigError(format!("invalid log level: {}", e)))?;

        let path = Path::new(file_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MonsrvError::ConfigError(format!("log directory: {}", e)))?;
        }

        let file_appender = tracing_appender::rolling::daily(
            path.parent().unwrap_or_else(|| Path::new(".")),
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("monsrv.log"),
        );
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true);
        layers.push(file_layer.with_filter(env_filter).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| MonsrvError::ConfigError(format!("failed to initialize logging: {}", e)))?;

    Ok(guard)
}

/// Initialize logging for tests
#[allow(dead_code)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
