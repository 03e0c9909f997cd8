use thiserror::Error;

use crate::value::ValueKind;

/// Errors produced by value-model operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A native value of a kind outside the supported set was wrapped.
    #[error("unsupported value kind: {kind}")]
    UnsupportedValueKind { kind: String },

    /// A changeset key is not declared on the target's schema.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("type mismatch: found {actual}, expected {desired}")]
    MismatchType { actual: ValueKind, desired: ValueKind },

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("invalid record identifier: {0}")]
    InvalidRecordId(String),
}

impl ValueError {
    /// Create an `UnsupportedValueKind` error for the given kind name.
    pub fn unsupported(kind: impl Into<String>) -> Self {
        Self::UnsupportedValueKind { kind: kind.into() }
    }
}

/// Result alias for value-model operations.
pub type ValueResult<T> = Result<T, ValueError>;
