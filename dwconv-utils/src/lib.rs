//! Common helpers shared across dwconv crates.

/// Runtime options and persisted settings.
pub mod config;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use anyhow::{Context, Result};
use log::LevelFilter;

pub use config::{AppSettings, Precision, RuntimeOptions, TelemetrySettings};
pub use telemetry::{Phase, TimingGuard, timing_guard};

/// Install the global `env_logger` logger. Fails if one is already installed.
///
/// `RUST_LOG` wins when it is set; otherwise `default_filter` applies.
/// Telemetry records are always let through so [`telemetry::configure`]
/// alone decides whether timing guards log.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(telemetry::TELEMETRY_TARGET, LevelFilter::Trace);

    builder
        .try_init()
        .context("a global logger is already installed")
}
