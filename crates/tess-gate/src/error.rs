use std::fmt;

use tess_engine::EngineError;
use tess_types::{ValueError, ValueKind};

use crate::config::ConfigError;

/// Errors surfaced by the access gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No store has been initialized or attached yet.
    #[error("no persistent store configured")]
    ContainerNotFound,

    /// The model declares no entity with this name.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("type mismatch: found {actual}, expected {desired}")]
    MismatchType { actual: ValueKind, desired: ValueKind },

    /// A changeset names a key the entity does not declare.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("no object found")]
    NoObjectFound,

    #[error("expected one object, found {0}")]
    MultipleObjectsFound(usize),

    /// The query could not be compiled or executed.
    #[error("fetch failed: {0}")]
    FetchError(EngineError),

    #[error("unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    /// A native engine failure: lookup, validation, save or I/O.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The gate worker has stopped.
    #[error("access gate is shut down")]
    Shutdown,
}

impl From<ValueError> for GateError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::UnsupportedValueKind { kind } => Self::UnsupportedValueKind(kind),
            ValueError::InvalidAttribute(name) => Self::InvalidAttribute(name),
            ValueError::MismatchType { actual, desired } => Self::MismatchType { actual, desired },
            other => Self::Engine(EngineError::Value(other)),
        }
    }
}

impl PartialEq for GateError {
    fn eq(&self, other: &Self) -> bool {
        // Compare by display representation for test convenience.
        fmt::format(format_args!("{self}")) == fmt::format(format_args!("{other}"))
    }
}

/// Result alias for gate operations.
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_errors_map_onto_gate_taxonomy() {
        assert_eq!(
            GateError::from(ValueError::unsupported("u64")),
            GateError::UnsupportedValueKind("u64".into())
        );
        assert_eq!(
            GateError::from(ValueError::InvalidAttribute("isbn".into())),
            GateError::InvalidAttribute("isbn".into())
        );
        assert!(matches!(
            GateError::from(ValueError::InvalidUri("x".into())),
            GateError::Engine(EngineError::Value(_))
        ));
    }

    #[test]
    fn display_names_the_entity() {
        let err = GateError::EntityNotFound("Shelf".into());
        assert_eq!(err.to_string(), "entity not found: Shelf");
    }
}
