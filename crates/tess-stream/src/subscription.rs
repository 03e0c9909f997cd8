use std::collections::VecDeque;
use std::sync::Arc;

use tess_engine::{ChangeBatch, ObserverId, PersistentStore};
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{unpack, Event};

/// A cancellable sequence of [`Event`]s from one store.
///
/// Every subscription registers its own observer with the store, so two
/// subscriptions never share or steal each other's events. Only changes
/// committed after the subscription was created are delivered.
///
/// Cancelling, or dropping, the subscription deregisters the observer
/// exactly once and discards undelivered events.
pub struct Subscription {
    store: Option<Arc<dyn PersistentStore>>,
    observer: Option<ObserverId>,
    receiver: Option<mpsc::UnboundedReceiver<Arc<ChangeBatch>>>,
    pending: VecDeque<Event>,
}

impl Subscription {
    /// Start observing `store`.
    pub fn observe(store: Arc<dyn PersistentStore>) -> Self {
        let (observer, receiver) = store.add_observer().into_parts();
        debug!(store = store.name(), %observer, "subscription started");
        Self {
            store: Some(store),
            observer: Some(observer),
            receiver: Some(receiver),
            pending: VecDeque::new(),
        }
    }

    /// A subscription that is already finished.
    pub fn empty() -> Self {
        Self {
            store: None,
            observer: None,
            receiver: None,
            pending: VecDeque::new(),
        }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is cancelled or the store is gone.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let batch = self.receiver.as_mut()?.recv().await?;
            self.pending.extend(unpack(&batch));
        }
    }

    /// The next event if one is ready, without waiting.
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let batch = self.receiver.as_mut()?.try_recv().ok()?;
            self.pending.extend(unpack(&batch));
        }
    }

    /// Stop the subscription. Calling it again does nothing.
    pub fn cancel(&mut self) {
        if let (Some(store), Some(observer)) = (self.store.take(), self.observer.take()) {
            store.remove_observer(observer);
            debug!(store = store.name(), %observer, "subscription cancelled");
        }
        self.receiver = None;
        self.pending.clear();
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("observer", &self.observer)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Open a new, independent subscription on `store`.
pub fn observe_changes(store: Arc<dyn PersistentStore>) -> Subscription {
    Subscription::observe(store)
}
