//! Warden Agent - inspection sidecar for reverse proxies
//!
//! The proxy offloads every request (and optionally every response) to the
//! agent as a named-argument message. The agent runs the message through the
//! security engine of the addressed application and answers with verdict
//! variables the proxy uses to let the traffic through, redirect it or
//! reject it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────┐  request   ┌───────────┐    ┌───────┐    ┌─────────────────────┐
//! │  Proxy  │ ─────────► │ transport │ ─► │ Agent │ ─► │ ApplicationRegistry │
//! │         │ ◄───────── │           │    │       │    │      (ArcSwap)      │
//! └─────────┘  verdict   └───────────┘    └───────┘    └──────────┬──────────┘
//!                                                                 │ resolve
//!                                                                 ▼
//!                                             ┌────────────────────────────────────┐
//!                                             │ Application                        │
//!                                             │   Engine  ──►  Transaction phases  │
//!                                             │   TransactionCache (id ─► handle)  │
//!                                             └────────────────────────────────────┘
//! ```
//!
//! A request whose phases complete without interruption is parked in its
//! application's [`TransactionCache`] until the paired response arrives or
//! its TTL elapses. Every transaction is finalized exactly once, by whichever
//! of response, eviction or interruption handling claims it first.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_agent::{Agent, ApplicationRegistry, RegistrySnapshot};
//! use warden_config::{AgentConfig, ApplicationConfig};
//! use warden_core::{Args, MessageKind, PassthroughEngineFactory};
//!
//! let config = AgentConfig::builder()
//!     .application(ApplicationConfig::new("default", "SecRuleEngine On"))
//!     .default_application("default")
//!     .build_validated()
//!     .unwrap();
//!
//! let snapshot = RegistrySnapshot::from_config(&config, &PassthroughEngineFactory::new()).unwrap();
//! let agent = Agent::new(Arc::new(ApplicationRegistry::new(snapshot)));
//!
//! let args = Args::new().with("id", "abc").with("method", "GET");
//! let verdict = agent.handle(MessageKind::Request, &args);
//! assert!(!verdict.is_hit());
//! ```

#![doc(html_root_url = "https://docs.rs/warden-agent/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod application;
pub mod cache;
pub mod error;
pub mod handle;
pub mod notify;
pub mod registry;
pub mod reload;
pub mod server;
pub mod transport;

pub use agent::Agent;
pub use application::Application;
pub use cache::TransactionCache;
pub use error::{AgentError, AgentResult};
pub use handle::{FinalizeGuard, HandleState, TransactionHandle};
pub use notify::SystemdNotifier;
pub use registry::{ApplicationRegistry, RegistrySnapshot};
pub use reload::Reloader;
pub use server::Server;
pub use transport::{serve_connection, Frame};

/// Agent version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
