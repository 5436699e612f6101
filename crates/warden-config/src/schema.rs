//! Configuration schema types.
//!
//! This module defines the structure of the configuration sections.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Default transaction TTL in milliseconds.
pub const DEFAULT_TRANSACTION_TTL_MS: u64 = 10_000;

/// One named inspection profile.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use warden_config::ApplicationConfig;
///
/// let app = ApplicationConfig::new("shop", "SecRuleEngine On").with_response_check(true);
/// assert_eq!(app.transaction_ttl(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    /// Unique application name, matched against the `app` message argument.
    pub name: String,

    /// Rule directives handed to the engine.
    #[serde(default)]
    pub directives: String,

    /// Keep transactions after the request phase and inspect responses.
    #[serde(default)]
    pub response_check: bool,

    /// How long a transaction may wait for its response, in milliseconds.
    /// Zero selects the default.
    #[serde(default = "default_transaction_ttl_ms")]
    pub transaction_ttl_ms: u64,
}

impl ApplicationConfig {
    /// Create an application with default settings.
    pub fn new(name: impl Into<String>, directives: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directives: directives.into(),
            response_check: false,
            transaction_ttl_ms: DEFAULT_TRANSACTION_TTL_MS,
        }
    }

    /// Enable or disable response checking.
    #[must_use]
    pub fn with_response_check(mut self, enabled: bool) -> Self {
        self.response_check = enabled;
        self
    }

    /// Set the transaction TTL.
    #[must_use]
    pub fn with_transaction_ttl(mut self, ttl: Duration) -> Self {
        self.transaction_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Effective transaction TTL.
    pub fn transaction_ttl(&self) -> Duration {
        match self.transaction_ttl_ms {
            0 => Duration::from_millis(DEFAULT_TRANSACTION_TTL_MS),
            ms => Duration::from_millis(ms),
        }
    }
}

fn default_transaction_ttl_ms() -> u64 {
    DEFAULT_TRANSACTION_TTL_MS
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    #[default]
    Json,
    /// Human-readable output.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "warden_agent=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Enable ANSI colors in pretty output.
    #[serde(default)]
    pub ansi_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus scrape endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,

    /// Histogram bucket boundaries for message duration, in seconds.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
            histogram_buckets: default_histogram_buckets(),
        }
    }
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9100".to_string()
}

fn default_histogram_buckets() -> Vec<f64> {
    vec![
        0.000_1, 0.000_25, 0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
    ]
}

/// Where the agent listens.
///
/// Parsed from `host:port`, `tcp://host:port` or `unix:///path/to/socket`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddress {
    /// TCP socket address.
    Tcp(SocketAddr),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl FromStr for BindAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once("://").unwrap_or(("tcp", s));
        match scheme {
            "tcp" => rest.parse().map(Self::Tcp).map_err(|_| {
                ConfigError::invalid_value("bind", format!("invalid socket address: {rest}"))
            }),
            "unix" if !rest.is_empty() => Ok(Self::Unix(PathBuf::from(rest))),
            "unix" => Err(ConfigError::invalid_value("bind", "empty unix socket path")),
            other => Err(ConfigError::invalid_value(
                "bind",
                format!("unsupported network: {other}"),
            )),
        }
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
