//! Persistence engine collaborator for Tessera.
//!
//! The client layer never touches storage directly; it talks to a
//! [`PersistentStore`] through short-lived [`MutationContext`]s. This crate
//! defines those traits, the runtime [`Schema`] they validate against, the
//! engine's [`NativeFilter`] (with a parser for its textual form) and one
//! reference implementation, [`MemoryStore`].
//!
//! # Engine Rules
//!
//! 1. Record identifiers are assigned on creation and never reused.
//! 2. Work done in a context is private until `save` succeeds.
//! 3. A save commits all of its changes or none of them.
//! 4. Observers see every committed batch after their registration, and
//!    nothing from before it.
//!
//! [`MemoryStore`] keeps records in memory and, unless opened in memory,
//! rewrites a single JSON image (`<name>.tess.json`) after each save. On
//! open the image is migrated to the current schema by dropping whatever
//! the schema no longer declares.

pub mod error;
pub mod filter;
pub mod format;
mod image;
pub mod memory;
pub mod notify;
pub mod record;
pub mod schema;
pub mod traits;

pub use error::{EngineError, EngineResult, FilterError, FilterResult};
pub use filter::NativeFilter;
pub use memory::{MemoryContext, MemoryStore, StoreOptions, IMAGE_EXTENSION};
pub use notify::{ChangeBatch, ChangeObserver, ObserverId, ObserverRegistry};
pub use record::ManagedRecord;
pub use schema::{AttributeDescription, EntityDescription, RelationshipDescription, Schema};
pub use traits::{FetchRequest, MutationContext, PersistentStore};
