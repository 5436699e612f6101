//! Error types for the Warden agent.

use thiserror::Error;
use warden_config::ConfigError;
use warden_core::{CoreError, MessageKind};

/// Agent errors.
///
/// Every variant except [`AgentError::EngineInit`] and [`AgentError::Config`]
/// is contained to the message that produced it.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The message could not be decoded.
    #[error("bad {kind}: {source}")]
    Decode {
        /// Kind of message being decoded.
        kind: MessageKind,
        /// Decoder error.
        #[source]
        source: CoreError,
    },

    /// Neither the requested nor the default application exists.
    #[error("application not found: {name:?}")]
    ApplicationNotFound {
        /// Requested application name, empty when none was given.
        name: String,
    },

    /// No cached transaction for a response.
    #[error("transaction not found: {id}")]
    TransactionNotFound {
        /// Transaction id.
        id: String,
    },

    /// Another path is already finalizing the transaction.
    #[error("transaction {id} is already being finalized")]
    TransactionBusy {
        /// Transaction id.
        id: String,
    },

    /// A response arrived for an application that does not inspect responses.
    #[error("response check is disabled for application {app}")]
    ResponseCheckDisabled {
        /// Application name.
        app: String,
    },

    /// The header blob contained a line without a separator.
    #[error("invalid headers for transaction {tx}: {source}")]
    MalformedHeader {
        /// Transaction id.
        tx: String,
        /// Parser error.
        #[source]
        source: CoreError,
    },

    /// A phase failed inside the engine.
    #[error("engine error in application {app}, transaction {tx}: {message}")]
    Engine {
        /// Transaction id.
        tx: String,
        /// Application name.
        app: String,
        /// Engine error message.
        message: String,
    },

    /// An engine could not be built from an application's directives.
    #[error("failed to build engine for application {app}: {message}")]
    EngineInit {
        /// Application name.
        app: String,
        /// Engine error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Create a decode error.
    pub fn decode(kind: MessageKind, source: CoreError) -> Self {
        Self::Decode { kind, source }
    }

    /// Create an application-not-found error.
    pub fn application_not_found(name: impl Into<String>) -> Self {
        Self::ApplicationNotFound { name: name.into() }
    }

    /// Create a transaction-not-found error.
    pub fn transaction_not_found(id: impl Into<String>) -> Self {
        Self::TransactionNotFound { id: id.into() }
    }

    /// Create a transaction-busy error.
    pub fn transaction_busy(id: impl Into<String>) -> Self {
        Self::TransactionBusy { id: id.into() }
    }

    /// Create a response-check-disabled error.
    pub fn response_check_disabled(app: impl Into<String>) -> Self {
        Self::ResponseCheckDisabled { app: app.into() }
    }

    /// Create a malformed header error.
    pub fn malformed_header(tx: impl Into<String>, source: CoreError) -> Self {
        Self::MalformedHeader {
            tx: tx.into(),
            source,
        }
    }

    /// Create an engine error with its transaction context.
    pub fn engine(tx: impl Into<String>, app: impl Into<String>, source: &CoreError) -> Self {
        Self::Engine {
            tx: tx.into(),
            app: app.into(),
            message: source.to_string(),
        }
    }

    /// Create an engine construction error.
    pub fn engine_init(app: impl Into<String>, source: &CoreError) -> Self {
        Self::EngineInit {
            app: app.into(),
            message: source.to_string(),
        }
    }

    /// Whether message dispatch can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::EngineInit { .. } | Self::Config(_))
    }

    /// Get the error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::ApplicationNotFound { .. } => "application_not_found",
            Self::TransactionNotFound { .. } => "transaction_not_found",
            Self::TransactionBusy { .. } => "transaction_busy",
            Self::ResponseCheckDisabled { .. } => "response_check_disabled",
            Self::MalformedHeader { .. } => "malformed_header",
            Self::Engine { .. } => "engine",
            Self::EngineInit { .. } => "engine_init",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
