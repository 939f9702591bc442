//! Logger initialization using tracing.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::LoggingConfig;

/// Initialize the global tracing subscriber from config.
///
/// Returns the appender guard; hold it for the process lifetime so buffered
/// file output is flushed on shutdown.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if let Some(log_dir) = &config.log_dir {
        let file_appender = rolling::daily(log_dir, "levers.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        // File output is always JSON for downstream tooling.
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true);

        let stdout_layer: Box<dyn Layer<_> + Send + Sync> = match config.format.as_str() {
            "json" => Box::new(tracing_subscriber::fmt::layer().json()),
            _ => Box::new(tracing_subscriber::fmt::layer().pretty()),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()?;
        Ok(Some(guard))
    } else {
        let stdout_layer: Box<dyn Layer<_> + Send + Sync> = match config.format.as_str() {
            "json" => Box::new(tracing_subscriber::fmt::layer().json()),
            _ => Box::new(tracing_subscriber::fmt::layer().pretty()),
        };
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .try_init()?;
        Ok(None)
    }
}
