//! Logging initialization for ironsift-daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `IronsiftConfig`. `RUST_LOG`, when set, replaces `general.log_level`.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ironsift_core::config::GeneralConfig;

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-parseable JSON lines (default for production).
    Json,
    /// Human-readable multi-line output (for development).
    Pretty,
}

impl LogFormat {
    /// Parse a `general.log_format` value.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            )),
        }
    }
}

/// Build the level filter: `RUST_LOG` first, then the configured level.
///
/// The capture crates are kept at the configured level even when the
/// default directive is quieter, so lifecycle events stay visible.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!(
        "{level},ironsift_xdp_engine={level},ironsift_daemon={level}"
    ))
    .map_err(|e| anyhow!("invalid log level '{level}': {e}"))
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format = LogFormat::parse(&config.log_format)?;
    let filter = build_filter(&config.log_level)?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_thread_names(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_thread_names(true))
            .try_init(),
    }
    .map_err(|e| anyhow!("failed to initialize {format:?} tracing subscriber: {e}"))
}
