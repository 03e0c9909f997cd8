use std::sync::Arc;

use tess_types::{RecordId, StoreId};

use crate::error::EngineResult;
use crate::filter::NativeFilter;
use crate::notify::{ChangeObserver, ObserverId};
use crate::record::ManagedRecord;
use crate::schema::{EntityDescription, Schema};

/// A filtered query against one entity.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub entity: String,
    pub filter: NativeFilter,
    /// Stop after this many matches.
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: NativeFilter::True,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: NativeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A persistence engine holding the records of one store.
///
/// Implementations must satisfy:
/// - Record identifiers are assigned once and never reused.
/// - A save is all-or-nothing: a failed save leaves committed state unchanged.
/// - Observers receive a [`ChangeBatch`](crate::ChangeBatch) only for saves
///   committed after they registered.
/// - All methods are callable from any thread.
pub trait PersistentStore: Send + Sync {
    /// The store name it was opened with.
    fn name(&self) -> &str;

    fn store_id(&self) -> StoreId;

    fn schema(&self) -> &Schema;

    /// Runtime description of `name`, or `None` if the schema lacks it.
    fn entity(&self, name: &str) -> Option<Arc<EntityDescription>>;

    /// A fresh, short-lived unit of work.
    fn new_context(&self) -> Box<dyn MutationContext + '_>;

    /// Register for change batches from saves committed from now on.
    fn add_observer(&self) -> ChangeObserver;

    /// Deregister an observer. Returns `false` if it was not registered.
    fn remove_observer(&self, id: ObserverId) -> bool;
}

/// A unit of work against a [`PersistentStore`].
///
/// Changes made through a context are invisible to other contexts and to
/// fetches until [`save`](MutationContext::save) succeeds. Dropping a
/// context discards unsaved changes.
pub trait MutationContext: Send {
    /// Create a record of `entity` with schema defaults and generated
    /// values filled in.
    fn insert(&mut self, entity: &str) -> EngineResult<&mut ManagedRecord>;

    /// Attach the committed record `id` to this context for mutation.
    fn record(&mut self, id: &RecordId) -> EngineResult<&mut ManagedRecord>;

    /// Committed records matching `request`, in key order.
    fn fetch(&self, request: &FetchRequest) -> EngineResult<Vec<ManagedRecord>>;

    /// Mark `id` for deletion.
    fn delete(&mut self, id: &RecordId) -> EngineResult<()>;

    fn has_changes(&self) -> bool;

    /// Validate and commit every pending change, then notify observers.
    fn save(&mut self) -> EngineResult<()>;
}
