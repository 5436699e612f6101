//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{AgentConfig, ConfigError, LogFormat};

/// Environment variable prefix used by the agent binary.
pub const ENV_PREFIX: &str = "WARDEN";

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// Applications can only be defined in the file; environment variables
/// override the scalar agent settings.
///
/// # Example
///
/// ```no_run
/// use warden_config::ConfigLoader;
///
/// # fn main() -> Result<(), warden_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("/etc/warden/config.toml")?
///     .with_env_prefix("WARDEN")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: AgentConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the file at `path` with `.env` and `WARDEN__` environment
    /// overrides.
    ///
    /// This is what the agent does at startup and on every reload.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be loaded or validation fails.
    pub fn load_path<P: AsRef<Path>>(path: P) -> Result<AgentConfig, ConfigError> {
        Self::new()
            .with_dotenv()
            .with_file(path)?
            .with_env_prefix(ENV_PREFIX)
            .load()
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats.
    /// The file format is determined by the file extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unsupported.
    ///
    /// # Example
    ///
    /// ```
    /// use warden_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     bind = "127.0.0.1:7000"
    ///
    ///     [[applications]]
    ///     name = "default"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.bind, "127.0.0.1:7000");
    /// assert_eq!(config.applications[0].name, "default");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__KEY` or
    /// `PREFIX__SECTION__KEY`, for example `WARDEN__BIND` or
    /// `WARDEN__LOGGING__LEVEL`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        self
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable cannot be parsed or
    /// validation fails.
    pub fn load(mut self) -> Result<AgentConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    fn parse_file(content: &str, path: &Path) -> Result<AgentConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Some other variable sharing the prefix, e.g. WARDEN_HOME.
            return Ok(());
        };

        let parts: Vec<&str> = rest.split("__").collect();

        match parts.as_slice() {
            ["BIND"] => {
                self.config.bind = value.to_string();
            }
            ["DEFAULT_APPLICATION"] => {
                self.config.default_application = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ["MAX_CONNECTIONS"] => {
                self.config.max_connections = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["SHUTDOWN_TIMEOUT_SECS"] => {
                self.config.shutdown_timeout_secs = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }

            ["LOGGING", "LEVEL"] => {
                self.config.logging.level = value.to_string();
            }
            ["LOGGING", "FORMAT"] => {
                self.config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["LOGGING", "ANSI_ENABLED"] => {
                self.config.logging.ansi_enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            ["METRICS", "ENABLED"] => {
                self.config.metrics.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["METRICS", "ADDR"] => {
                self.config.metrics.addr = value.to_string();
            }

            _ => {}
        }

        Ok(())
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
        bind = "unix:///run/warden/agent.sock"
        default_application = "shop"
        max_connections = 64
        shutdown_timeout_secs = 3

        [logging]
        level = "debug"
        format = "pretty"

        [metrics]
        enabled = true
        addr = "127.0.0.1:9300"

        [[applications]]
        name = "shop"
        directives = """
        SecRuleEngine On
        SecRule REQUEST_URI "@streq /admin" "id:101,phase:1,deny,status:403"
        """
        response_check = true
        transaction_ttl_ms = 500

        [[applications]]
        name = "static"
        directives = "SecRuleEngine Off"
    "#;

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.max_connections, 1024);
    }

    #[test]
    fn test_complete_toml_config() {
        let config = ConfigLoader::new()
            .with_string(FULL, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.default_application.as_deref(), Some("shop"));
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.metrics.enabled);
        assert_eq!(config.applications.len(), 2);

        let shop = config.application("shop").unwrap();
        assert!(shop.response_check);
        assert_eq!(shop.transaction_ttl_ms, 500);
        assert!(shop.directives.contains("id:101"));
        assert!(!config.application("static").unwrap().response_check);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"bind": "127.0.0.1:7001", "applications": [{"name": "a"}]}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.bind, "127.0.0.1:7001");
    }

    #[test]
    fn test_loader_unsupported_format() {
        assert!(ConfigLoader::new().with_string("", "yaml").is_err());
    }

    #[test]
    fn test_loader_with_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.applications.len(), 2);
    }

    #[test]
    fn test_load_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = ConfigLoader::load_path(file.path()).unwrap();
        assert_eq!(config.default_application.as_deref(), Some("shop"));

        let result = ConfigLoader::load_path("/nonexistent/warden.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/warden.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(ConfigLoader::new().with_file(file.path()).is_err());
    }

    #[test]
    fn test_load_validates() {
        let toml = r#"
            default_application = "missing"

            [[applications]]
            name = "a"
        "#;
        let result = ConfigLoader::new().with_string(toml, "toml").unwrap().load();
        assert!(matches!(
            result,
            Err(ConfigError::UnknownDefaultApplication { .. })
        ));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    // Environment overrides are exercised through apply_env_var directly,
    // since mutating the process environment is unsafe on recent toolchains.

    #[test]
    fn test_apply_env_var_scalars() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__BIND", "unix:///tmp/w.sock", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__MAX_CONNECTIONS", "8", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__DEFAULT_APPLICATION", "", "TEST")
            .unwrap();

        assert_eq!(loader.config.bind, "unix:///tmp/w.sock");
        assert_eq!(loader.config.max_connections, 8);
        assert_eq!(loader.config.default_application, None);
    }

    #[test]
    fn test_apply_env_var_sections() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__LOGGING__FORMAT", "pretty", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__METRICS__ENABLED", "true", "TEST")
            .unwrap();

        assert_eq!(loader.config.logging.format, LogFormat::Pretty);
        assert!(loader.config.metrics.enabled);
    }

    #[test]
    fn test_apply_env_var_invalid() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("TEST__SHUTDOWN_TIMEOUT_SECS", "soon", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__LOGGING__FORMAT", "xml", "TEST")
            .is_err());
    }

    #[test]
    fn test_apply_env_var_ignores_unrelated() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("TEST_HOME", "/x", "TEST").is_ok());
        assert!(loader.apply_env_var("TEST__UNKNOWN", "x", "TEST").is_ok());
    }
}
