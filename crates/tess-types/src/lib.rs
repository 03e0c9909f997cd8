//! Foundation types for Tessera.
//!
//! Every other Tessera crate depends on `tess-types`. It holds the
//! type-erased value model that lets callers read and write records without
//! touching the persistence engine's native record types.
//!
//! # Key Types
//!
//! - [`AttributeValue`]: Closed tagged union over every supported attribute kind
//! - [`RecordId`]: Durable identifier addressing a record across sessions
//! - [`Snapshot`]: Immutable, point-in-time copy of a record's attributes
//! - [`Changeset`]: Sparse set of assignments merged into a record
//! - [`Record`]: The attribute get/set surface a live engine record exposes

pub mod error;
pub mod identity;
pub mod record;
pub mod value;

pub use error::{ValueError, ValueResult};
pub use identity::{RecordId, StoreId};
pub use record::{Changeset, Record, Snapshot};
pub use value::{AttributeValue, FromAttributeValue, Uri, ValueKind};
