//! Typed configuration for the Warden inspection agent.
//!
//! This crate provides:
//! - TOML and JSON configuration files
//! - Environment variable overrides (`WARDEN__SECTION__KEY`)
//! - Strict validation (fails on unknown fields, duplicate applications,
//!   undefined default application)
//! - A file watcher for hot reload
//!
//! # Configuration File Format
//!
//! ```toml
//! bind = "127.0.0.1:9000"          # or "unix:///run/warden.sock"
//! default_application = "default"
//! max_connections = 1024
//! shutdown_timeout_secs = 10
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = false
//! addr = "127.0.0.1:9100"
//!
//! [[applications]]
//! name = "default"
//! directives = "SecRuleEngine On"
//! response_check = true
//! transaction_ttl_ms = 10000
//! ```
//!
//! # Example
//!
//! ```no_run
//! use warden_config::ConfigLoader;
//!
//! # fn main() -> Result<(), warden_config::ConfigError> {
//! let config = ConfigLoader::load_path("/etc/warden/config.toml")?;
//! println!("listening on {}", config.bind_address()?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;
mod watcher;

pub use config::{AgentConfig, AgentConfigBuilder};
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::{
    ApplicationConfig, BindAddress, LogFormat, LoggingConfig, MetricsConfig,
    DEFAULT_TRANSACTION_TTL_MS,
};
pub use watcher::{ConfigChange, ConfigWatcher, ConfigWatcherBuilder, FileChangeKind};
