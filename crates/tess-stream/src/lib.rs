//! Change notifications for Tessera stores.
//!
//! A [`Subscription`] turns the engine's change batches into a sequence of
//! typed [`Event`]s. Subscriptions are independent of the access gate: they
//! share the store handle but never queue behind CRUD traffic, and delivery
//! is not transactionally linked to the write that caused it.

pub mod event;
pub mod subscription;

pub use event::{unpack, Event, EventKind};
pub use subscription::{observe_changes, Subscription};
