//! Verdict variables relayed back to the proxy.

use serde::{Deserialize, Serialize};

use crate::engine::Interruption;

/// Name of the pass/fail indicator variable.
pub const VAR_FAIL: &str = "fail";
/// Name of the transaction id variable.
pub const VAR_ID: &str = "id";
/// Name of the error indicator variable.
pub const VAR_ERROR: &str = "error";

/// Value of one verdict variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarValue {
    /// Integer value.
    Int(i64),
    /// String value.
    Str(String),
}

/// A transaction-scoped variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: VarValue,
}

/// The list of variables produced for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Variables in the order they were set.
    pub vars: Vec<Variable>,
}

impl Verdict {
    /// Nothing matched: `fail = 0`.
    pub fn miss() -> Self {
        Self::default().set_int(VAR_FAIL, 0)
    }

    /// A phase interrupted the transaction.
    pub fn interrupted(interruption: &Interruption) -> Self {
        Self::default()
            .set_int(VAR_FAIL, 1)
            .set_int("status", i64::from(interruption.status))
            .set_str("action", interruption.action.as_str())
            .set_str("data", interruption.data.clone())
            .set_int("ruleid", i64::try_from(interruption.rule_id).unwrap_or(i64::MAX))
    }

    /// The message could not be processed.
    pub fn error() -> Self {
        Self::default().set_int(VAR_ERROR, 1)
    }

    /// Attach the transaction id.
    #[must_use]
    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.set_str(VAR_ID, id)
    }

    /// Set an integer variable.
    #[must_use]
    pub fn set_int(mut self, name: impl Into<String>, value: i64) -> Self {
        self.vars.push(Variable {
            name: name.into(),
            value: VarValue::Int(value),
        });
        self
    }

    /// Set a string variable.
    #[must_use]
    pub fn set_str(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push(Variable {
            name: name.into(),
            value: VarValue::Str(value.into()),
        });
        self
    }

    /// Look up a variable; the last write wins.
    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.vars
            .iter()
            .rev()
            .find(|v| v.name == name)
            .map(|v| &v.value)
    }

    /// Whether this verdict reports an interruption.
    pub fn is_hit(&self) -> bool {
        self.get(VAR_FAIL) == Some(&VarValue::Int(1))
    }

    /// Whether this verdict reports a processing error.
    pub fn is_error(&self) -> bool {
        self.get(VAR_ERROR) == Some(&VarValue::Int(1))
    }
}
