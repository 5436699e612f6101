//! Error types for message decoding and engine calls.

use thiserror::Error;

use crate::args::ValueKind;

/// Errors produced by the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A mandatory argument is absent from the message.
    #[error("missing mandatory argument: {field}")]
    MissingField {
        /// Argument name.
        field: &'static str,
    },

    /// An argument is present but carries a value of the wrong type.
    #[error("invalid argument for {field}, {expected} expected, got {found}")]
    TypeMismatch {
        /// Argument name.
        field: &'static str,
        /// Expected value kind.
        expected: ValueKind,
        /// Kind actually received.
        found: ValueKind,
    },

    /// An argument has the right type but an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Argument name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A header line has no `:` separator.
    #[error("invalid header: {line:?}")]
    MalformedHeader {
        /// The offending line.
        line: String,
    },

    /// The rule engine failed while processing a phase.
    #[error("engine error: {message}")]
    Engine {
        /// Error message.
        message: String,
    },

    /// The rule engine could not be built from its directives.
    #[error("engine initialization failed: {message}")]
    EngineInit {
        /// Error message.
        message: String,
    },
}

impl CoreError {
    /// Create a missing field error.
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(field: &'static str, expected: ValueKind, found: ValueKind) -> Self {
        Self::TypeMismatch {
            field,
            expected,
            found,
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Create a malformed header error.
    pub fn malformed_header(line: impl Into<String>) -> Self {
        Self::MalformedHeader { line: line.into() }
    }

    /// Create an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Create an engine initialization error.
    pub fn engine_init(message: impl Into<String>) -> Self {
        Self::EngineInit {
            message: message.into(),
        }
    }

    /// Whether this error came out of decoding the message arguments.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::TypeMismatch { .. } | Self::InvalidValue { .. }
        )
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::type_mismatch("status", ValueKind::Int, ValueKind::Str);
        assert_eq!(
            err.to_string(),
            "invalid argument for status, int expected, got str"
        );

        let err = CoreError::malformed_header("no separator");
        assert!(err.to_string().contains("no separator"));
    }

    #[test]
    fn test_is_decode_error() {
        assert!(CoreError::missing_field("id").is_decode_error());
        assert!(CoreError::invalid_value("status", "out of range").is_decode_error());
        assert!(!CoreError::engine("boom").is_decode_error());
        assert!(!CoreError::malformed_header("x").is_decode_error());
    }
}
