//! Logging setup.

use std::env;
use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{Config, LogFormat};

/// Installs the global subscriber writing to stderr.
///
/// Stdout is reserved for command output.
pub fn init_tracing(config: &Config) {
    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let layer = match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().flatten_event(true).boxed(),
        LogFormat::Simplified | LogFormat::Auto => layer.with_ansi(false).compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter(config.logging.level))
        .init();
}

/// Builds the filter from `RUST_LOG`, or applies `level` to the stowage crates.
fn env_filter(level: LevelFilter) -> EnvFilter {
    if let Ok(value) = env::var(EnvFilter::DEFAULT_ENV) {
        return EnvFilter::new(value);
    }

    EnvFilter::new(format!(
        "WARN,stowage={level},stowage_cli={level},stowage_service={level},stowage_types={level}"
    ))
}
