use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::record::ManagedRecord;

/// The records touched by one successful save, in commit state.
///
/// Deleted records carry their last committed values.
#[derive(Clone, Debug, Default)]
pub struct ChangeBatch {
    pub inserted: Vec<ManagedRecord>,
    pub updated: Vec<ManagedRecord>,
    pub deleted: Vec<ManagedRecord>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// Handle identifying one registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Receiving side of an observer registration.
///
/// Each observer owns an unbounded queue; batches published before the
/// registration are never delivered to it.
#[derive(Debug)]
pub struct ChangeObserver {
    id: ObserverId,
    receiver: mpsc::UnboundedReceiver<Arc<ChangeBatch>>,
}

impl ChangeObserver {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next batch. `None` once the observer is removed or
    /// the store is gone.
    pub async fn recv(&mut self) -> Option<Arc<ChangeBatch>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<ChangeBatch>> {
        self.receiver.try_recv().ok()
    }

    pub fn into_parts(self) -> (ObserverId, mpsc::UnboundedReceiver<Arc<ChangeBatch>>) {
        (self.id, self.receiver)
    }
}

struct Observer {
    id: ObserverId,
    sender: mpsc::UnboundedSender<Arc<ChangeBatch>>,
}

/// Fan-out of committed change batches to registered observers.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<Observer>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> ChangeObserver {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.observers
            .write()
            .expect("observer lock poisoned")
            .push(Observer { id, sender });
        debug!(%id, "observer registered");
        ChangeObserver { id, receiver }
    }

    /// Remove an observer. Returns `false` when it was already gone.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().expect("observer lock poisoned");
        let before = observers.len();
        observers.retain(|o| o.id != id);
        let removed = observers.len() != before;
        if removed {
            debug!(%id, "observer removed");
        }
        removed
    }

    /// Deliver `batch` to every observer.
    /// Observers whose receivers were dropped are pruned.
    pub fn publish(&self, batch: ChangeBatch) {
        if batch.is_empty() {
            return;
        }
        let batch = Arc::new(batch);
        let mut observers = self.observers.write().expect("observer lock poisoned");
        observers.retain(|o| o.sender.send(Arc::clone(&batch)).is_ok());
        debug!(changes = batch.len(), observers = observers.len(), "change batch published");
    }

    pub fn len(&self) -> usize {
        self.observers.read().expect("observer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tess_types::{RecordId, StoreId};

    fn batch(n: usize) -> ChangeBatch {
        let schema = crate::fixtures::catalog();
        let entity = Arc::new(schema.entity("Author").unwrap().clone());
        let store = StoreId::generate();
        ChangeBatch {
            inserted: (0..n as u64)
                .map(|k| ManagedRecord::new(RecordId::new(store, "Author", k), Arc::clone(&entity)))
                .collect(),
            ..ChangeBatch::default()
        }
    }

    #[tokio::test]
    async fn each_observer_gets_every_batch() {
        let registry = ObserverRegistry::new();
        let mut a = registry.register();
        let mut b = registry.register();
        assert_ne!(a.id(), b.id());

        registry.publish(batch(2));
        assert_eq!(a.recv().await.unwrap().len(), 2);
        assert_eq!(b.recv().await.unwrap().len(), 2);
    }

    #[test]
    fn late_observers_see_no_history() {
        let registry = ObserverRegistry::new();
        registry.publish(batch(1));
        let mut late = registry.register();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ObserverRegistry::new();
        let a = registry.register();
        let _b = registry.register();
        assert!(registry.remove(a.id()));
        assert!(!registry.remove(a.id()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let registry = ObserverRegistry::new();
        drop(registry.register());
        let _kept = registry.register();
        registry.publish(batch(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_batches_are_not_published() {
        let registry = ObserverRegistry::new();
        let mut a = registry.register();
        registry.publish(ChangeBatch::default());
        assert!(a.try_recv().is_none());
    }
}
