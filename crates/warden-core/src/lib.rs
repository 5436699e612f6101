//! # Warden Core
//!
//! Core types shared by the Warden inspection agent.
//!
//! The proxy sends the agent named-argument messages ("inspect this request",
//! "inspect this response") and expects a small set of verdict variables back.
//! This crate holds everything that does not depend on the agent runtime:
//!
//! - [`Args`] / [`ArgValue`] - the loosely-typed argument map of one message
//! - [`InspectionRequest`] / [`InspectionResponse`] - typed records produced by
//!   the field-table decoder in [`message`]
//! - [`parse_headers`] - the `Key: Value` header blob parser
//! - [`Engine`] / [`Transaction`] / [`EngineFactory`] - the boundary to the
//!   external security rule engine
//! - [`Verdict`] - the variables relayed back to the proxy
//!
//! # Example
//!
//! ```
//! use warden_core::{decode_request, Args};
//!
//! let args = Args::new()
//!     .with("id", "tx-1")
//!     .with("method", "GET")
//!     .with("headers", "Host: localhost\r\n");
//!
//! let decoded = decode_request(&args).unwrap();
//! assert_eq!(decoded.value.path, "/");
//! assert_eq!(decoded.value.version, "1.1");
//! ```

#![doc(html_root_url = "https://docs.rs/warden-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod args;
pub mod engine;
mod error;
pub mod headers;
pub mod message;
pub mod passthrough;
mod verdict;

pub use args::{ArgValue, Args, ValueKind};
pub use engine::{
    Engine, EngineFactory, Interruption, InterruptionAction, MatchedRule, MatchedRuleCallback,
    Severity, Transaction,
};
pub use error::{CoreError, CoreResult};
pub use headers::parse_headers;
pub use message::{
    decode_request, decode_response, generate_transaction_id, Decoded, FieldError,
    InspectionRequest, InspectionResponse, MessageKind,
};
pub use passthrough::PassthroughEngineFactory;
pub use verdict::{VarValue, Variable, Verdict};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
