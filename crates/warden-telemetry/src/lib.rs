//! Observability for the Warden inspection agent.
//!
//! - **Logging**: structured JSON or pretty logs via `tracing-subscriber`
//! - **Metrics**: instrumentation through the `metrics` facade, optionally
//!   exported by a Prometheus listener
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_telemetry::{init_logging, init_metrics};
//!
//! init_logging(&config.logging)?;
//! init_metrics(&config.metrics)?;
//! ```

#![doc(html_root_url = "https://docs.rs/warden-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::init_logging;
pub use metrics::init_metrics;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
