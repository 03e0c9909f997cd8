//! Serialized access gate for Tessera stores.
//!
//! Every create, read, update and delete against a store runs through one
//! worker task that owns the store handle. Callers talk to it over a
//! command channel and await a one-shot reply; requests from many tasks
//! queue up and never race each other inside the engine.
//!
//! # Quick Start
//!
//! ```rust
//! use tess_engine::{AttributeDescription, EntityDescription, Schema};
//! use tess_gate::{AccessGate, GateConfig};
//! use tess_predicate::Predicate;
//! use tess_types::{Changeset, ValueKind};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let model = Schema::new(1).with_entity(
//!     EntityDescription::new("Book")
//!         .with_attribute(AttributeDescription::new("title", ValueKind::String)),
//! );
//! let gate = AccessGate::spawn(GateConfig::with_model(model));
//! gate.initialize("catalog", true).await.unwrap();
//! gate.insert("Book", Changeset::new().with("title", "Dune")).await.unwrap();
//! let found = gate
//!     .fetch("Book", Some(Predicate::equal("title", "Dune")))
//!     .await
//!     .unwrap();
//! assert_eq!(found.len(), 1);
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gate;

pub use config::{ConfigError, GateConfig};
pub use error::{GateError, GateResult};
pub use gate::AccessGate;

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use tess_engine::{
        AttributeDescription, ChangeObserver, EngineError, EngineResult, EntityDescription,
        FetchRequest, ManagedRecord, MemoryStore, MutationContext, ObserverId, PersistentStore,
        RelationshipDescription, Schema,
    };
    use tess_predicate::{field, Predicate};
    use tess_stream::EventKind;
    use tess_types::{AttributeValue, Changeset, RecordId, StoreId, ValueKind};

    /// Helper: the catalog model used throughout.
    fn model() -> Schema {
        Schema::new(1)
            .with_entity(
                EntityDescription::new("Book")
                    .with_attribute(AttributeDescription::new("title", ValueKind::String).required())
                    .with_attribute(AttributeDescription::new("year", ValueKind::Int32))
                    .with_attribute(AttributeDescription::new("uid", ValueKind::Uuid).generated())
                    .with_relationship(RelationshipDescription::to_many("authors", "Author")),
            )
            .with_entity(
                EntityDescription::new("Author")
                    .with_attribute(AttributeDescription::new("name", ValueKind::String)),
            )
    }

    /// Helper: a gate with an in-memory catalog store.
    async fn gate() -> AccessGate {
        let gate = AccessGate::spawn(GateConfig::with_model(model()));
        gate.initialize("catalog", true).await.unwrap();
        gate
    }

    fn book(title: &str, year: i32) -> Changeset {
        Changeset::new().with("title", title).with("year", year)
    }

    // -----------------------------------------------------------------------
    // 1. Nothing works before a store is configured
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let gate = AccessGate::spawn(GateConfig::with_model(model()));
        assert_eq!(
            gate.fetch("Book", None).await.unwrap_err(),
            GateError::ContainerNotFound
        );
        assert_eq!(
            gate.insert("Book", book("Dune", 1965)).await.unwrap_err(),
            GateError::ContainerNotFound
        );
        assert!(matches!(
            gate.observe_changes().await,
            Err(GateError::ContainerNotFound)
        ));
    }

    // -----------------------------------------------------------------------
    // 2. Initialization is idempotent
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn second_initialize_is_silent_noop() {
        let gate = gate().await;
        gate.insert("Book", book("Dune", 1965)).await.unwrap();
        let before = gate.store().await.unwrap().store_id();

        // Different name and mode: ignored, nothing reset.
        gate.initialize("other", false).await.unwrap();
        let other = MemoryStore::in_memory("injected", model()).unwrap();
        gate.initialize_with_handle(Arc::new(other)).await.unwrap();

        assert_eq!(gate.store().await.unwrap().store_id(), before);
        assert_eq!(gate.fetch("Book", None).await.unwrap().len(), 1);
    }

    // -----------------------------------------------------------------------
    // 3. Injected handles
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn initialize_with_handle_uses_given_store() {
        let store: Arc<dyn PersistentStore> =
            Arc::new(MemoryStore::in_memory("injected", model()).unwrap());
        let gate = AccessGate::spawn(GateConfig::default());
        gate.initialize_with_handle(Arc::clone(&store)).await.unwrap();
        let snap = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        assert_eq!(snap.record_id().store(), store.store_id());
    }

    // -----------------------------------------------------------------------
    // 4. Insert then fetch
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn insert_then_fetch_by_title() {
        let gate = gate().await;
        let inserted = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        gate.insert("Book", book("Emma", 1815)).await.unwrap();

        assert_eq!(inserted.get_as::<String>("title").as_deref(), Some("Dune"));
        // Generated by the engine on creation.
        assert_eq!(inserted.get("uid").map(|v| v.kind()), Some(ValueKind::Uuid));

        let found = gate
            .fetch("Book", Some(Predicate::equal("title", "Dune")))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_id(), inserted.record_id());
        assert_eq!(gate.fetch("Book", None).await.unwrap().len(), 2);
    }

    // -----------------------------------------------------------------------
    // 5. Unknown entities and keys
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn insert_rejects_unknown_entity_and_keys() {
        let gate = gate().await;
        assert_eq!(
            gate.insert("Shelf", Changeset::new()).await.unwrap_err(),
            GateError::EntityNotFound("Shelf".into())
        );
        assert_eq!(
            gate.insert("Book", book("Dune", 1965).with("isbn", "x"))
                .await
                .unwrap_err(),
            GateError::InvalidAttribute("isbn".into())
        );
        assert!(gate.fetch("Book", None).await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // 6. Partial update preserves other fields
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn partial_update_keeps_unassigned_fields() {
        let gate = gate().await;
        let snap = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        let updated = gate
            .update(snap.record_id(), Changeset::new().with("year", 1966i32))
            .await
            .unwrap();
        assert_eq!(updated.get_as::<i32>("year"), Some(1966));
        assert_eq!(updated.get_as::<String>("title").as_deref(), Some("Dune"));
        assert_eq!(updated.get("uid"), snap.get("uid"));
    }

    // -----------------------------------------------------------------------
    // 7. Null clears a field
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn null_clears_field() {
        let gate = gate().await;
        let snap = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        let mut changes = Changeset::new();
        changes.clear("year");
        let updated = gate.update(snap.record_id(), changes).await.unwrap();
        assert!(updated.get("year").is_none());
    }

    // -----------------------------------------------------------------------
    // 8. Delete removes the record
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn delete_then_fetch_is_empty() {
        let gate = gate().await;
        let snap = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        gate.delete(snap.record_id()).await.unwrap();
        let found = gate
            .fetch("Book", Some(Predicate::equal("title", "Dune")))
            .await
            .unwrap();
        assert!(found.is_empty());
        assert!(matches!(
            gate.delete(snap.record_id()).await,
            Err(GateError::Engine(EngineError::RecordNotFound(_)))
        ));
    }

    // -----------------------------------------------------------------------
    // 9. Lookup failures propagate from the engine
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn update_of_missing_record_fails() {
        let gate = gate().await;
        let store_id = gate.store().await.unwrap().store_id();
        let missing = RecordId::new(store_id, "Book", 4242);
        assert!(matches!(
            gate.update(&missing, book("x", 1)).await,
            Err(GateError::Engine(EngineError::RecordNotFound(_)))
        ));
    }

    // -----------------------------------------------------------------------
    // 10. Save validation errors surface as engine errors
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn missing_required_field_fails_insert() {
        let gate = gate().await;
        let err = gate
            .insert("Book", Changeset::new().with("year", 1965i32))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Engine(EngineError::MissingRequired { .. })
        ));
        assert!(gate.fetch("Book", None).await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // 11. exists: none, first match
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn exists_returns_first_match_or_none() {
        let gate = gate().await;
        assert!(gate
            .exists("Book", Predicate::equal("title", "Dune"))
            .await
            .unwrap()
            .is_none());

        let first = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        gate.insert("Book", book("Dune", 1984)).await.unwrap();
        let found = gate
            .exists("Book", Predicate::equal("title", "Dune"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.record_id(), first.record_id());
    }

    // -----------------------------------------------------------------------
    // 12. Bad predicates are fetch errors
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn bad_predicates_are_fetch_errors() {
        let gate = gate().await;
        assert!(matches!(
            gate.fetch("Book", Some(Predicate::equal("isbn", "x"))).await,
            Err(GateError::FetchError(EngineError::Filter(_)))
        ));
        assert!(matches!(
            gate.fetch("Book", Some(Predicate::raw("title ==", vec![]))).await,
            Err(GateError::FetchError(EngineError::Filter(_)))
        ));
        assert!(matches!(
            gate.fetch("Shelf", None).await,
            Err(GateError::FetchError(EngineError::UnknownEntity(_)))
        ));
    }

    // -----------------------------------------------------------------------
    // 13. Raw filters and ANY over relationships
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn raw_and_any_predicates() {
        let gate = gate().await;
        let author = gate
            .insert("Author", Changeset::new().with("name", "Frank Herbert"))
            .await
            .unwrap();
        let authors = AttributeValue::List(vec![AttributeValue::Uri(author.record_id().to_uri())]);
        gate.insert("Book", book("Dune", 1965).with("authors", authors))
            .await
            .unwrap();
        gate.insert("Book", book("Emma", 1815)).await.unwrap();

        let by_author = field("authors").any(field("name").contains("herbert").case_insensitive());
        assert_eq!(gate.fetch("Book", Some(by_author)).await.unwrap().len(), 1);

        let raw = Predicate::raw("year < %@ OR title == %@", vec![1900i32.into(), "Dune".into()]);
        assert_eq!(gate.fetch("Book", Some(raw)).await.unwrap().len(), 2);
    }

    // -----------------------------------------------------------------------
    // 14. Concurrent inserts all land with distinct ids
    // -----------------------------------------------------------------------
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_are_serialized() {
        let gate = gate().await;
        let mut tasks = Vec::new();
        for i in 0..32 {
            let gate = gate.clone();
            tasks.push(tokio::spawn(async move {
                gate.insert("Book", book(&format!("Book {i}"), i)).await
            }));
        }
        let mut ids = std::collections::HashSet::new();
        for task in tasks {
            let snap = task.await.unwrap().unwrap();
            assert!(ids.insert(snap.record_id().clone()));
        }
        assert_eq!(gate.fetch("Book", None).await.unwrap().len(), 32);
    }

    // -----------------------------------------------------------------------
    // 15. Observing through the gate
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn observe_changes_sees_gate_writes() {
        let gate = gate().await;
        let mut sub = gate.observe_changes().await.unwrap();
        let snap = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        let event = sub.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Inserted);
        assert_eq!(event.record_id(), snap.record_id());
    }

    // -----------------------------------------------------------------------
    // 16. Shutdown
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn calls_after_shutdown_fail() {
        let gate = gate().await;
        gate.shutdown().await.unwrap();
        assert_eq!(
            gate.fetch("Book", None).await.unwrap_err(),
            GateError::Shutdown
        );
        assert!(gate.shutdown().await.is_err());
    }

    // -----------------------------------------------------------------------
    // 17. File-backed stores persist across gates
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig {
            directory: dir.path().to_path_buf(),
            ..GateConfig::with_model(model())
        };

        let gate = AccessGate::spawn(config.clone());
        gate.initialize("catalog", false).await.unwrap();
        let snap = gate.insert("Book", book("Dune", 1965)).await.unwrap();
        gate.shutdown().await.unwrap();

        let reopened = AccessGate::spawn(config);
        reopened.initialize("catalog", false).await.unwrap();
        let found = reopened.fetch("Book", None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_id(), snap.record_id());
    }

    // -----------------------------------------------------------------------
    // 18. Engine work runs off the async worker thread
    // -----------------------------------------------------------------------

    /// Store whose fetches block until the test releases them.
    struct GatedStore {
        inner: MemoryStore,
        started: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    struct GatedContext<'s> {
        inner: Box<dyn MutationContext + 's>,
        store: &'s GatedStore,
    }

    impl PersistentStore for GatedStore {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn store_id(&self) -> StoreId {
            self.inner.store_id()
        }

        fn schema(&self) -> &Schema {
            self.inner.schema()
        }

        fn entity(&self, name: &str) -> Option<Arc<EntityDescription>> {
            self.inner.entity(name)
        }

        fn new_context(&self) -> Box<dyn MutationContext + '_> {
            Box::new(GatedContext {
                inner: self.inner.new_context(),
                store: self,
            })
        }

        fn add_observer(&self) -> ChangeObserver {
            self.inner.add_observer()
        }

        fn remove_observer(&self, id: ObserverId) -> bool {
            self.inner.remove_observer(id)
        }
    }

    impl MutationContext for GatedContext<'_> {
        fn insert(&mut self, entity: &str) -> EngineResult<&mut ManagedRecord> {
            self.inner.insert(entity)
        }

        fn record(&mut self, id: &RecordId) -> EngineResult<&mut ManagedRecord> {
            self.inner.record(id)
        }

        fn fetch(&self, request: &FetchRequest) -> EngineResult<Vec<ManagedRecord>> {
            if let Some(started) = self.store.started.lock().unwrap().take() {
                let _ = started.send(());
            }
            self.store
                .release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(2))
                .map_err(|_| EngineError::Schema("fetch was never released".into()))?;
            self.inner.fetch(request)
        }

        fn delete(&mut self, id: &RecordId) -> EngineResult<()> {
            self.inner.delete(id)
        }

        fn has_changes(&self) -> bool {
            self.inner.has_changes()
        }

        fn save(&mut self) -> EngineResult<()> {
            self.inner.save()
        }
    }

    #[tokio::test]
    async fn blocking_engine_call_leaves_runtime_free() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let store = GatedStore {
            inner: MemoryStore::in_memory("catalog", model()).unwrap(),
            started: Mutex::new(Some(started_tx)),
            release: Mutex::new(release_rx),
        };
        let gate = AccessGate::spawn(GateConfig::default());
        gate.initialize_with_handle(Arc::new(store)).await.unwrap();

        let pending = tokio::spawn({
            let gate = gate.clone();
            async move { gate.fetch("Book", None).await }
        });
        // Single-threaded runtime: this only resumes if the fetch is not
        // holding the runtime thread.
        started_rx.await.unwrap();
        release_tx.send(()).unwrap();
        assert!(pending.await.unwrap().unwrap().is_empty());
    }
}
