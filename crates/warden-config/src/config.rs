//! Main configuration types.
//!
//! This module provides the top-level [`AgentConfig`] struct and its builder.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ApplicationConfig, BindAddress, ConfigError, LoggingConfig, MetricsConfig};

/// Complete agent configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use warden_config::AgentConfig;
///
/// let config = AgentConfig::default();
/// assert_eq!(config.bind, "127.0.0.1:9000");
/// assert!(config.applications.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Listen address: `host:port`, `tcp://host:port` or `unix:///path`.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Application used when a message names none, or an unknown one.
    #[serde(default)]
    pub default_application: Option<String>,

    /// Maximum number of concurrent proxy connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Inspection profiles.
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_application: None,
            max_connections: default_max_connections(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            applications: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl AgentConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use warden_config::{AgentConfig, ApplicationConfig};
    ///
    /// let config = AgentConfig::builder()
    ///     .bind("unix:///run/warden.sock")
    ///     .application(ApplicationConfig::new("default", "SecRuleEngine On"))
    ///     .default_application("default")
    ///     .build_validated()
    ///     .unwrap();
    ///
    /// assert_eq!(config.applications.len(), 1);
    /// ```
    #[must_use]
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::new()
    }

    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `bind` cannot be parsed.
    pub fn bind_address(&self) -> Result<BindAddress, ConfigError> {
        self.bind.parse()
    }

    /// Graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Look up an application by name.
    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.name == name)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `bind` is not a valid listen address
    /// - `max_connections` is zero
    /// - an application name is empty or used twice
    /// - `default_application` names an undefined application
    /// - the metrics address is invalid while metrics are enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address()?;

        if self.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "max_connections",
                "must be greater than zero",
            ));
        }

        if self.applications.is_empty() {
            warn!("no applications configured; every message will fail to resolve");
        }

        let mut seen = HashSet::new();
        for app in &self.applications {
            if app.name.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    "applications.name",
                    "must not be empty",
                ));
            }
            if !seen.insert(app.name.as_str()) {
                return Err(ConfigError::DuplicateApplication {
                    name: app.name.clone(),
                });
            }
        }

        if let Some(name) = &self.default_application {
            if !seen.contains(name.as_str()) {
                return Err(ConfigError::UnknownDefaultApplication { name: name.clone() });
            }
        }

        if self.metrics.enabled && self.metrics.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Check that `next` may replace `self` at runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the listen address changed.
    pub fn check_reloadable(&self, next: &Self) -> Result<(), ConfigError> {
        if self.bind != next.bind {
            return Err(ConfigError::validation_error(format!(
                "bind cannot change on reload ({} -> {})",
                self.bind, next.bind
            )));
        }
        Ok(())
    }
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address.
    #[must_use]
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.config.bind = bind.into();
        self
    }

    /// Set the default application.
    #[must_use]
    pub fn default_application(mut self, name: impl Into<String>) -> Self {
        self.config.default_application = Some(name.into());
        self
    }

    /// Add an application.
    #[must_use]
    pub fn application(mut self, app: ApplicationConfig) -> Self {
        self.config.applications.push(app);
        self
    }

    /// Set the connection limit.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the shutdown timeout in seconds.
    #[must_use]
    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_timeout_secs = secs;
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Set the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> AgentConfig {
        self.config
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<AgentConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str) -> ApplicationConfig {
        ApplicationConfig::new(name, "SecRuleEngine On")
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = AgentConfig::builder()
            .bind("0.0.0.0:12345")
            .application(app("a"))
            .application(app("b").with_response_check(true))
            .default_application("a")
            .max_connections(16)
            .build();

        assert_eq!(config.bind, "0.0.0.0:12345");
        assert_eq!(config.max_connections, 16);
        assert!(config.application("b").unwrap().response_check);
        assert!(config.application("c").is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_bind() {
        let result = AgentConfig::builder().bind("not-an-address").build_validated();
        assert!(result.unwrap_err().to_string().contains("bind"));
    }

    #[test]
    fn test_validate_duplicate_application() {
        let result = AgentConfig::builder()
            .application(app("a"))
            .application(app("a"))
            .build_validated();
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateApplication { ref name }) if name == "a"
        ));
    }

    #[test]
    fn test_validate_empty_application_name() {
        let result = AgentConfig::builder().application(app(" ")).build_validated();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_unknown_default() {
        let result = AgentConfig::builder()
            .application(app("a"))
            .default_application("b")
            .build_validated();
        assert!(matches!(
            result,
            Err(ConfigError::UnknownDefaultApplication { .. })
        ));
    }

    #[test]
    fn test_validate_zero_connections() {
        let result = AgentConfig::builder().max_connections(0).build_validated();
        assert!(result.unwrap_err().to_string().contains("max_connections"));
    }

    #[test]
    fn test_validate_invalid_metrics_addr() {
        let result = AgentConfig::builder()
            .metrics(MetricsConfig {
                enabled: true,
                addr: "invalid".to_string(),
                ..Default::default()
            })
            .build_validated();
        assert!(result.unwrap_err().to_string().contains("metrics.addr"));
    }

    #[test]
    fn test_check_reloadable() {
        let old = AgentConfig::builder().application(app("a")).build();
        let same_bind = AgentConfig::builder().application(app("b")).build();
        let new_bind = AgentConfig::builder().bind("127.0.0.1:9999").build();

        assert!(old.check_reloadable(&same_bind).is_ok());
        assert!(old
            .check_reloadable(&new_bind)
            .unwrap_err()
            .to_string()
            .contains("bind cannot change"));
    }

    #[test]
    fn test_toml_round_trip_keeps_applications() {
        let config = AgentConfig::builder()
            .application(app("a").with_response_check(true))
            .default_application("a")
            .build();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[[applications]]"));

        let parsed: AgentConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<AgentConfig, _> = toml::from_str(r#"listen = "127.0.0.1:1""#);
        assert!(result.is_err());
    }
}
