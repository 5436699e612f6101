//! # Warden Test
//!
//! Test utilities for the Warden inspection agent.
//!
//! - [`ScriptedEngineFactory`] builds deterministic engines whose behaviour is
//!   scripted through the application's directives, and records every
//!   transaction in a shared [`Ledger`] so tests can assert that logging and
//!   close ran exactly once.
//! - [`request_args`] / [`response_args`] build realistic message argument
//!   maps.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_core::{EngineFactory, MatchedRule};
//! use warden_test::ScriptedEngineFactory;
//!
//! let factory = ScriptedEngineFactory::new();
//! let engine = factory
//!     .build("interrupt request-headers deny 403 1001", Arc::new(|_: &MatchedRule| {}))
//!     .unwrap();
//!
//! let mut tx = engine.new_transaction("abc");
//! assert_eq!(tx.process_request_headers().unwrap().status, 403);
//! tx.process_logging();
//! tx.close().unwrap();
//!
//! assert!(factory.ledger().finalized_once("abc"));
//! ```

#![doc(html_root_url = "https://docs.rs/warden-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod engine;
mod messages;

pub use engine::{Ledger, Phase, ScriptedEngine, ScriptedEngineFactory, TransactionRecord};
pub use messages::{request_args, response_args};
