use tess_types::{RecordId, ValueError, ValueKind};

/// Errors raised while parsing, compiling or evaluating a filter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    /// The format string could not be tokenized or parsed.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// More `%@` placeholders than arguments.
    #[error("format needs more than {supplied} argument(s)")]
    MissingArgument { supplied: usize },

    /// Arguments left over after every placeholder was bound.
    #[error("{unused} argument(s) not consumed by the format")]
    UnusedArguments { unused: usize },

    /// A comparison names a key the entity does not declare.
    #[error("entity {entity} has no key {key}")]
    UnknownKey { entity: String, key: String },

    /// `ANY` used on something other than a to-many relationship.
    #[error("{entity}.{relation} is not a to-many relationship")]
    NotToMany { entity: String, relation: String },

    /// `IN` compared against something other than a list.
    #[error("IN on {key} needs a list operand")]
    InNeedsList { key: String },
}

/// Errors from persistence engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The schema declares no entity with this name.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The entity declares no attribute or relationship with this name.
    #[error("entity {entity} has no key {key}")]
    UnknownKey { entity: String, key: String },

    /// No record with this identifier exists in the store.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// The identifier belongs to another store.
    #[error("record {0} belongs to a different store")]
    ForeignRecord(RecordId),

    /// A non-optional attribute has no value at save time.
    #[error("{entity}.{key} is required")]
    MissingRequired { entity: String, key: String },

    /// A value's kind does not match the declared attribute kind.
    #[error("{entity}.{key} expects {expected}, got {actual}")]
    KindMismatch {
        entity: String,
        key: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// The schema itself is inconsistent.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// The on-disk image was written by an incompatible schema and
    /// automatic migration is disabled.
    #[error("store {store} needs migration from schema version {found} to {expected}")]
    MigrationRequired {
        store: String,
        found: u32,
        expected: u32,
    },

    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("value error: {0}")]
    Value(#[from] ValueError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result alias for filter compilation and evaluation.
pub type FilterResult<T> = Result<T, FilterError>;
