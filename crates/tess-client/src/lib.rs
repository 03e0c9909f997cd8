//! Client facade for Tessera.
//!
//! [`StoreClient`] is the operation set applications program against:
//! initialize, fetch, exists, insert, update, delete and change
//! observation. [`Tessera`] implements it over an access gate and a real
//! store; [`PreviewClient`] implements it without any store at all.

pub mod client;
pub mod preview;

pub use client::{StoreClient, Tessera};
pub use preview::PreviewClient;

// Re-export key types
pub use tess_engine::{
    AttributeDescription, EntityDescription, PersistentStore, RelationshipDescription, Schema,
};
pub use tess_gate::{AccessGate, GateConfig, GateError, GateResult};
pub use tess_predicate::{field, Predicate};
pub use tess_stream::{Event, EventKind, Subscription};
pub use tess_types::{AttributeValue, Changeset, RecordId, Snapshot, ValueKind};
