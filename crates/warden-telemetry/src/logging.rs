//! Structured logging for Warden.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and either a
//! JSON or a pretty `fmt` layer. The filter string from the configuration is
//! used unless `RUST_LOG` is set.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_config::LoggingConfig;
//! use warden_telemetry::logging::init_logging;
//!
//! init_logging(&LoggingConfig::default())?;
//! tracing::info!(tx = "ABCDEF", app = "shop", "transaction cached");
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use warden_config::{LogFormat, LoggingConfig};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> TelemetryResult<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.is_empty() => create_env_filter(&from_env)?,
        _ => create_env_filter(&config.level)?,
    };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_ansi(config.ansi_enabled)
                .with_target(true)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
    }

    Ok(())
}

/// Creates an env filter from a string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid log level {filter:?}: {e}")))
}

/// Standard log field names.
///
/// Use these field names for consistency across logs.
pub mod fields {
    /// Transaction id.
    pub const TX: &str = "tx";

    /// Application name.
    pub const APP: &str = "app";

    /// Message kind (`request` / `response`).
    pub const KIND: &str = "kind";

    /// Interruption status code.
    pub const STATUS: &str = "status";

    /// Interruption action.
    pub const ACTION: &str = "action";

    /// Matched rule id.
    pub const RULE_ID: &str = "rule_id";

    /// Error description.
    pub const ERROR: &str = "error";
}
