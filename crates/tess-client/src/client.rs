use std::sync::Arc;

use async_trait::async_trait;
use tess_engine::PersistentStore;
use tess_gate::{AccessGate, GateConfig, GateResult};
use tess_predicate::Predicate;
use tess_stream::Subscription;
use tess_types::{Changeset, RecordId, Snapshot};
use tracing::debug;

/// The public operation set of a Tessera store.
///
/// Implemented by [`Tessera`] for real stores and by
/// [`PreviewClient`](crate::PreviewClient) where no store should be touched.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Open the store `name`. Calling it again once open does nothing.
    async fn initialize(&self, name: &str, in_memory: bool) -> GateResult<()>;

    /// Use an already open store. Same idempotency as
    /// [`initialize`](StoreClient::initialize).
    async fn initialize_with_handle(&self, store: Arc<dyn PersistentStore>) -> GateResult<()>;

    /// Records of `entity` matching `predicate`; all records when `None`.
    async fn fetch(&self, entity: &str, predicate: Option<Predicate>) -> GateResult<Vec<Snapshot>>;

    /// The first record matching `predicate`, if any.
    async fn exists(&self, entity: &str, predicate: Predicate) -> GateResult<Option<Snapshot>>;

    async fn insert(&self, entity: &str, changeset: Changeset) -> GateResult<Snapshot>;

    async fn update(&self, id: &RecordId, changeset: Changeset) -> GateResult<Snapshot>;

    async fn delete(&self, id: &RecordId) -> GateResult<()>;

    /// A new, independent change subscription.
    async fn observe_changes(&self) -> GateResult<Subscription>;
}

/// Client over an [`AccessGate`].
#[derive(Clone, Debug)]
pub struct Tessera {
    gate: AccessGate,
}

impl Tessera {
    /// Spawn a gate for `config`. The store is opened by
    /// [`initialize`](StoreClient::initialize).
    pub fn new(config: GateConfig) -> Self {
        Self {
            gate: AccessGate::spawn(config),
        }
    }

    /// A client bound to an already open store.
    pub async fn with_handle(store: Arc<dyn PersistentStore>) -> GateResult<Self> {
        let client = Self::new(GateConfig::default());
        client.gate.initialize_with_handle(store).await?;
        Ok(client)
    }

    /// A client sharing an existing gate.
    pub fn from_gate(gate: AccessGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Stop the underlying gate; later calls fail with
    /// [`GateError::Shutdown`](tess_gate::GateError::Shutdown).
    pub async fn shutdown(&self) -> GateResult<()> {
        self.gate.shutdown().await
    }
}

#[async_trait]
impl StoreClient for Tessera {
    async fn initialize(&self, name: &str, in_memory: bool) -> GateResult<()> {
        debug!(store = name, in_memory, "initialize requested");
        self.gate.initialize(name, in_memory).await
    }

    async fn initialize_with_handle(&self, store: Arc<dyn PersistentStore>) -> GateResult<()> {
        debug!(store = store.name(), "attach requested");
        self.gate.initialize_with_handle(store).await
    }

    async fn fetch(&self, entity: &str, predicate: Option<Predicate>) -> GateResult<Vec<Snapshot>> {
        self.gate.fetch(entity, predicate).await
    }

    async fn exists(&self, entity: &str, predicate: Predicate) -> GateResult<Option<Snapshot>> {
        self.gate.exists(entity, predicate).await
    }

    async fn insert(&self, entity: &str, changeset: Changeset) -> GateResult<Snapshot> {
        self.gate.insert(entity, changeset).await
    }

    async fn update(&self, id: &RecordId, changeset: Changeset) -> GateResult<Snapshot> {
        self.gate.update(id, changeset).await
    }

    async fn delete(&self, id: &RecordId) -> GateResult<()> {
        self.gate.delete(id).await
    }

    async fn observe_changes(&self) -> GateResult<Subscription> {
        self.gate.observe_changes().await
    }
}
