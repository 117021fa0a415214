//! Process-wide logging setup.
//!
//! `log` records from library code are forwarded into `tracing` so a single
//! subscriber formats everything.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::SlidekitError;

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns an error when a global logger or subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), SlidekitError> {
    tracing_log::LogTracer::init()
        .map_err(|e| SlidekitError::Logging(format!("log bridge: {}", e)))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(build_directive(&config.level)));

    let subscriber = Registry::default()
        .with(filter)
        .with(config.json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!config.json).then(|| fmt::layer().with_writer(std::io::stderr)));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SlidekitError::Logging(e.to_string()))
}

fn build_directive(level: &str) -> String {
    format!("{level},slidekit={level}")
}
