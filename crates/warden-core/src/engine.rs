//! Boundary to the external security rule engine.
//!
//! Warden does not match rules itself. An [`EngineFactory`] turns an
//! application's directives into an [`Engine`], and the engine hands out one
//! [`Transaction`] per request/response pair. The agent drives the
//! transaction through its phases and reads back an optional
//! [`Interruption`] after each one.
//!
//! ```text
//! connection -> uri -> request headers -> request body
//!                                 (cached while the proxy waits for upstream)
//!                     response headers -> response body -> logging -> close
//! ```

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Builds engines from rule directives.
pub trait EngineFactory: Send + Sync {
    /// Build an engine for one application.
    ///
    /// `on_match` is invoked by the engine for every matched rule that
    /// should be logged.
    fn build(&self, directives: &str, on_match: MatchedRuleCallback) -> CoreResult<Arc<dyn Engine>>;
}

/// A constructed rule engine owned by one application.
pub trait Engine: Send + Sync {
    /// Start a new transaction with the given id.
    fn new_transaction(&self, id: &str) -> Box<dyn Transaction>;
}

/// One request/response pair inside the engine.
///
/// Every phase method may be called at most once and in order. Phases
/// returning `Some(Interruption)` end the transaction's inspection.
/// [`Transaction::process_logging`] and [`Transaction::close`] must be
/// called exactly once, last.
pub trait Transaction: Send {
    /// Engine-assigned id, equal to the id it was created with.
    fn id(&self) -> &str;

    /// Whether the rule engine is switched off for this transaction.
    fn is_rule_engine_off(&self) -> bool;

    /// Feed connection facts.
    fn process_connection(
        &mut self,
        client: IpAddr,
        client_port: u16,
        server: IpAddr,
        server_port: u16,
    );

    /// Feed the request line.
    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str);

    /// Add one request header.
    fn add_request_header(&mut self, key: &str, value: &str);

    /// Evaluate request header rules.
    fn process_request_headers(&mut self) -> Option<Interruption>;

    /// Buffer request body bytes.
    fn write_request_body(&mut self, body: &[u8]) -> CoreResult<Option<Interruption>>;

    /// Evaluate request body rules.
    fn process_request_body(&mut self) -> CoreResult<Option<Interruption>>;

    /// Add one response header.
    fn add_response_header(&mut self, key: &str, value: &str);

    /// Evaluate response header rules.
    fn process_response_headers(&mut self, status: u16, protocol: &str) -> Option<Interruption>;

    /// Buffer response body bytes.
    fn write_response_body(&mut self, body: &[u8]) -> CoreResult<Option<Interruption>>;

    /// Evaluate response body rules.
    fn process_response_body(&mut self) -> CoreResult<Option<Interruption>>;

    /// Emit the audit log for this transaction.
    fn process_logging(&mut self);

    /// Release engine resources held by the transaction.
    fn close(&mut self) -> CoreResult<()>;
}

/// Terminal verdict produced by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interruption {
    /// HTTP status the proxy should answer with.
    pub status: u16,
    /// What the proxy should do.
    pub action: InterruptionAction,
    /// Auxiliary data, e.g. the redirect location.
    pub data: String,
    /// Id of the rule that triggered the interruption.
    pub rule_id: u64,
}

impl Interruption {
    /// Create an interruption.
    pub fn new(action: InterruptionAction, status: u16, rule_id: u64) -> Self {
        Self {
            status,
            action,
            data: String::new(),
            rule_id,
        }
    }

    /// Attach auxiliary data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "interrupted with status {} and action {}",
            self.status, self.action
        )
    }
}

/// Disruptive action requested by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptionAction {
    /// Let the request through and stop evaluating.
    Allow,
    /// Reject with the interruption status.
    Deny,
    /// Redirect to the location in `data`.
    Redirect,
    /// Close the connection without a response.
    Drop,
}

impl InterruptionAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Redirect => "redirect",
            Self::Drop => "drop",
        }
    }
}

impl fmt::Display for InterruptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule severity, syslog ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 0
    Emergency,
    /// 1
    Alert,
    /// 2
    Critical,
    /// 3
    Error,
    /// 4
    Warning,
    /// 5
    Notice,
    /// 6
    Info,
    /// 7
    Debug,
}

/// A rule match reported by the engine for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    /// Transaction the match belongs to.
    pub transaction_id: String,
    /// Matched rule id.
    pub rule_id: u64,
    /// Rule severity.
    pub severity: Severity,
    /// Preformatted error log line.
    pub message: String,
}

/// Callback the engine uses to report matched rules.
pub type MatchedRuleCallback = Arc<dyn Fn(&MatchedRule) + Send + Sync>;
