//! Tracing setup driven by `[logging]`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use rapport_config::LoggingConfig;

use crate::error::{RapportError, Result};

/// Default filter for the rotating file layer.
const FILE_FILTER: &str =
    "rapport=trace,rapport_memory=trace,rapport_compose=trace,rapport_config=debug,info";

/// Console filter: `RUST_LOG` if set, else the configured directive.
fn console_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global subscriber.
///
/// Console output is human-readable or JSON per `config.json`. When
/// `config.directory` is set, JSON logs are also written to a daily-rotated
/// `rapport.log` there; keep the returned guard alive to flush them.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(console_filter(config))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(console_filter(config))
            .boxed()
    });

    let guard = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "rapport.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_filter(EnvFilter::new(FILE_FILTER))
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| RapportError::Logging(e.to_string()))?;

    Ok(guard)
}
