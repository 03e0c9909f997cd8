use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tess_types::{Record, RecordId, StoreId};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::image::StoreImage;
use crate::notify::{ChangeBatch, ChangeObserver, ObserverId, ObserverRegistry};
use crate::record::ManagedRecord;
use crate::schema::{narrow, EntityDescription, Schema};
use crate::traits::{FetchRequest, MutationContext, PersistentStore};

/// File suffix of a store image.
pub const IMAGE_EXTENSION: &str = "tess.json";

/// How a [`MemoryStore`] is opened.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Keep records in memory only; nothing touches disk.
    pub in_memory: bool,
    /// Directory holding `<name>.tess.json`; the working directory if unset.
    pub directory: Option<PathBuf>,
    /// Adapt an image written under another schema version instead of
    /// refusing to open it.
    pub automatic_migration: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            in_memory: true,
            directory: None,
            automatic_migration: true,
        }
    }
}

impl StoreOptions {
    /// Persist under `directory`, one image file per store name.
    pub fn on_disk(directory: impl Into<PathBuf>) -> Self {
        Self {
            in_memory: false,
            directory: Some(directory.into()),
            automatic_migration: true,
        }
    }
}

/// Reference [`PersistentStore`]: records in a `BTreeMap` behind a `RwLock`,
/// optionally mirrored to a single JSON image after every save.
pub struct MemoryStore {
    name: String,
    id: StoreId,
    schema: Schema,
    entities: HashMap<String, Arc<EntityDescription>>,
    location: Option<PathBuf>,
    records: RwLock<BTreeMap<u64, ManagedRecord>>,
    next_key: AtomicU64,
    observers: ObserverRegistry,
}

impl MemoryStore {
    /// Open the store `name`, loading and migrating its image when one
    /// exists on disk.
    pub fn open(name: &str, schema: Schema, options: StoreOptions) -> EngineResult<Self> {
        schema.validate()?;
        let entities: HashMap<String, Arc<EntityDescription>> = schema
            .entities
            .iter()
            .map(|e| (e.name.clone(), Arc::new(e.clone())))
            .collect();

        let location = (!options.in_memory).then(|| {
            options
                .directory
                .clone()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(format!("{name}.{IMAGE_EXTENSION}"))
        });

        let (id, next_key, records) = match &location {
            Some(path) if path.exists() => {
                let image = StoreImage::load(path)?;
                let id = StoreId::from_uuid(image.store_id);
                let next_key = image.next_key;
                let records =
                    image.migrate(name, &schema, &entities, options.automatic_migration)?;
                (id, next_key, records)
            }
            _ => (StoreId::generate(), 1, BTreeMap::new()),
        };

        let store = Self {
            name: name.to_string(),
            id,
            schema,
            entities,
            location,
            records: RwLock::new(records),
            next_key: AtomicU64::new(next_key),
            observers: ObserverRegistry::new(),
        };
        if let Some(path) = &store.location {
            let records = store.records.read().expect("store lock poisoned");
            store.image(&records).write(path)?;
        }

        info!(
            store = %store.name,
            id = %store.id,
            in_memory = options.in_memory,
            records = store.len(),
            "store opened"
        );
        Ok(store)
    }

    /// Open a fresh store that never touches disk.
    pub fn in_memory(name: &str, schema: Schema) -> EngineResult<Self> {
        Self::open(name, schema, StoreOptions::default())
    }

    /// Path of the backing image, if file-backed.
    pub fn location(&self) -> Option<&PathBuf> {
        self.location.as_ref()
    }

    /// Number of committed records across all entities.
    pub fn len(&self) -> usize {
        self.records.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live change observers, for tests and diagnostics.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn image(&self, records: &BTreeMap<u64, ManagedRecord>) -> StoreImage {
        StoreImage::capture(
            self.id,
            self.schema.version,
            self.next_key.load(Ordering::SeqCst),
            records,
        )
    }

    fn allocate_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::SeqCst)
    }

    fn check_owner(&self, id: &RecordId) -> EngineResult<()> {
        if id.store() == self.id {
            Ok(())
        } else {
            Err(EngineError::ForeignRecord(id.clone()))
        }
    }
}

impl PersistentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn store_id(&self) -> StoreId {
        self.id
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn entity(&self, name: &str) -> Option<Arc<EntityDescription>> {
        self.entities.get(name).cloned()
    }

    fn new_context(&self) -> Box<dyn MutationContext + '_> {
        Box::new(MemoryContext::new(self))
    }

    fn add_observer(&self) -> ChangeObserver {
        self.observers.register()
    }

    fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }
}

/// Unit of work over a [`MemoryStore`].
///
/// Records attached to the context are private copies; `originals` holds
/// the committed values they were attached with, which is how updates are
/// detected.
pub struct MemoryContext<'s> {
    store: &'s MemoryStore,
    registered: BTreeMap<u64, ManagedRecord>,
    originals: HashMap<u64, ManagedRecord>,
    inserted: BTreeSet<u64>,
    deleted: BTreeSet<u64>,
}

impl<'s> MemoryContext<'s> {
    fn new(store: &'s MemoryStore) -> Self {
        Self {
            store,
            registered: BTreeMap::new(),
            originals: HashMap::new(),
            inserted: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    fn updated_keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.registered.iter().filter_map(|(key, record)| {
            let changed = !self.deleted.contains(key)
                && self
                    .originals
                    .get(key)
                    .is_some_and(|original| !original.same_values(record));
            changed.then_some(*key)
        })
    }
}

impl MutationContext for MemoryContext<'_> {
    fn insert(&mut self, entity: &str) -> EngineResult<&mut ManagedRecord> {
        let description = self
            .store
            .entity(entity)
            .ok_or_else(|| EngineError::UnknownEntity(entity.to_string()))?;
        let key = self.store.allocate_key();
        let mut record = ManagedRecord::new(
            RecordId::new(self.store.id, entity, key),
            Arc::clone(&description),
        );
        for attr in &description.attributes {
            if let Some(value) = attr.initial_value() {
                record.values_mut().insert(attr.name.clone(), value);
            }
        }
        self.inserted.insert(key);
        Ok(self.registered.entry(key).or_insert(record))
    }

    fn record(&mut self, id: &RecordId) -> EngineResult<&mut ManagedRecord> {
        self.store.check_owner(id)?;
        let key = id.key();
        if self.deleted.contains(&key) {
            return Err(EngineError::RecordNotFound(id.clone()));
        }
        if !self.registered.contains_key(&key) {
            let committed = self
                .store
                .records
                .read()
                .expect("store lock poisoned")
                .get(&key)
                .filter(|r| r.id() == id)
                .cloned()
                .ok_or_else(|| EngineError::RecordNotFound(id.clone()))?;
            self.originals.insert(key, committed.clone());
            self.registered.insert(key, committed);
        }
        self.registered
            .get_mut(&key)
            .filter(|r| r.id() == id)
            .ok_or_else(|| EngineError::RecordNotFound(id.clone()))
    }

    fn fetch(&self, request: &FetchRequest) -> EngineResult<Vec<ManagedRecord>> {
        let entity = self
            .store
            .entity(&request.entity)
            .ok_or_else(|| EngineError::UnknownEntity(request.entity.clone()))?;
        request.filter.validate(&entity, &self.store.schema)?;

        let records = self.store.records.read().expect("store lock poisoned");
        let resolve = |id: &RecordId| records.get(&id.key()).filter(|r| r.id() == id);
        let limit = request.limit.unwrap_or(usize::MAX);
        let matches: Vec<ManagedRecord> = records
            .values()
            .filter(|r| r.entity_name() == entity.name)
            .filter(|r| request.filter.matches(r, &resolve))
            .take(limit)
            .cloned()
            .collect();
        debug!(
            entity = %request.entity,
            filter = %request.filter,
            matches = matches.len(),
            "fetch"
        );
        Ok(matches)
    }

    fn delete(&mut self, id: &RecordId) -> EngineResult<()> {
        let key = id.key();
        self.record(id)?;
        if self.inserted.remove(&key) {
            // Never committed: forget it.
            self.registered.remove(&key);
        } else {
            self.deleted.insert(key);
        }
        Ok(())
    }

    fn has_changes(&self) -> bool {
        !self.inserted.is_empty() || !self.deleted.is_empty() || self.updated_keys().next().is_some()
    }

    fn save(&mut self) -> EngineResult<()> {
        let updated: Vec<u64> = self.updated_keys().collect();
        if self.inserted.is_empty() && self.deleted.is_empty() && updated.is_empty() {
            return Ok(());
        }

        for key in self.inserted.iter().chain(updated.iter()) {
            if let Some(record) = self.registered.get_mut(key) {
                conform(record)?;
            }
        }

        let mut batch = ChangeBatch::default();
        {
            let mut committed = self.store.records.write().expect("store lock poisoned");
            let mut next = committed.clone();
            for key in &updated {
                if !next.contains_key(key) {
                    let id = self.registered[key].id().clone();
                    return Err(EngineError::RecordNotFound(id));
                }
            }
            for key in &self.deleted {
                if let Some(removed) = next.remove(key) {
                    batch.deleted.push(removed);
                }
            }
            for key in &self.inserted {
                let record = self.registered[key].clone();
                next.insert(*key, record.clone());
                batch.inserted.push(record);
            }
            for key in &updated {
                let record = self.registered[key].clone();
                next.insert(*key, record.clone());
                batch.updated.push(record);
            }
            if let Some(path) = &self.store.location {
                self.store.image(&next).write(path)?;
            }
            *committed = next;
        }

        for key in std::mem::take(&mut self.deleted) {
            self.registered.remove(&key);
            self.originals.remove(&key);
        }
        self.inserted.clear();
        self.originals = self
            .registered
            .iter()
            .map(|(key, record)| (*key, record.clone()))
            .collect();

        info!(
            store = %self.store.name,
            inserted = batch.inserted.len(),
            updated = batch.updated.len(),
            deleted = batch.deleted.len(),
            "saved"
        );
        self.store.observers.publish(batch);
        Ok(())
    }
}

/// Check a record against its entity and narrow numeric values to the
/// declared kinds.
fn conform(record: &mut ManagedRecord) -> EngineResult<()> {
    let entity = Arc::clone(record.entity_arc());
    for attr in &entity.attributes {
        match record.values_mut().get_mut(&attr.name) {
            None if !attr.optional => {
                return Err(EngineError::MissingRequired {
                    entity: entity.name.clone(),
                    key: attr.name.clone(),
                });
            }
            None => {}
            Some(value) => {
                let mismatch = || EngineError::KindMismatch {
                    entity: entity.name.clone(),
                    key: attr.name.clone(),
                    expected: attr.kind,
                    actual: value.kind(),
                };
                if !attr.accepts(value) {
                    return Err(mismatch());
                }
                let narrowed = narrow(value, attr.kind).ok_or_else(mismatch)?;
                *value = narrowed;
            }
        }
    }
    for rel in &entity.relationships {
        if let Some(value) = record.values().get(&rel.name) {
            if !rel.accepts(value) {
                return Err(EngineError::KindMismatch {
                    entity: entity.name.clone(),
                    key: rel.name.clone(),
                    expected: if rel.to_many {
                        tess_types::ValueKind::List
                    } else {
                        tess_types::ValueKind::Uri
                    },
                    actual: value.kind(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::NativeFilter;
    use tess_predicate::Predicate;
    use tess_types::{AttributeValue, Changeset, ValueKind};

    fn store() -> MemoryStore {
        MemoryStore::in_memory("catalog", crate::fixtures::catalog()).unwrap()
    }

    fn insert_book(store: &MemoryStore, title: &str, year: i32) -> RecordId {
        let mut ctx = store.new_context();
        let record = ctx.insert("Book").unwrap();
        Changeset::new()
            .with("title", title)
            .with("year", year)
            .apply(record)
            .unwrap();
        let id = record.id().clone();
        ctx.save().unwrap();
        id
    }

    fn fetch(store: &MemoryStore, predicate: Predicate) -> Vec<ManagedRecord> {
        let filter = NativeFilter::compile(&predicate).unwrap();
        store
            .new_context()
            .fetch(&FetchRequest::new("Book").with_filter(filter))
            .unwrap()
    }

    #[test]
    fn insert_and_fetch() {
        let store = store();
        let id = insert_book(&store, "Dune", 1965);
        insert_book(&store, "Emma", 1815);
        let found = fetch(&store, Predicate::equal("title", "Dune"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), &id);
        assert_eq!(fetch(&store, Predicate::all()).len(), 2);
    }

    #[test]
    fn keys_are_never_reused() {
        let store = store();
        let a = insert_book(&store, "A", 1);
        let mut ctx = store.new_context();
        ctx.delete(&a).unwrap();
        ctx.save().unwrap();
        let b = insert_book(&store, "B", 2);
        assert!(b.key() > a.key());
    }

    #[test]
    fn unsaved_changes_are_invisible() {
        let store = store();
        let mut ctx = store.new_context();
        let record = ctx.insert("Book").unwrap();
        record.set_value("title", Some("Draft".into()));
        assert!(ctx.has_changes());
        assert!(ctx.fetch(&FetchRequest::new("Book")).unwrap().is_empty());
        drop(ctx);
        assert!(store.is_empty());
    }

    #[test]
    fn update_detected_only_when_values_change() {
        let store = store();
        let id = insert_book(&store, "Dune", 1965);
        let mut ctx = store.new_context();
        ctx.record(&id).unwrap();
        assert!(!ctx.has_changes());
        Changeset::new()
            .with("title", "Dune")
            .apply(ctx.record(&id).unwrap())
            .unwrap();
        assert!(!ctx.has_changes());
        Changeset::new()
            .with("year", 1966i32)
            .apply(ctx.record(&id).unwrap())
            .unwrap();
        assert!(ctx.has_changes());
        ctx.save().unwrap();
        assert!(!ctx.has_changes());
        let found = fetch(&store, Predicate::equal("year", 1966i32));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn missing_required_value_fails_save_atomically() {
        let store = store();
        let mut ctx = store.new_context();
        ctx.insert("Book").unwrap();
        let err = ctx.save().unwrap_err();
        assert!(matches!(err, EngineError::MissingRequired { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn kind_mismatch_and_narrowing() {
        let store = store();
        let mut ctx = store.new_context();
        let record = ctx.insert("Book").unwrap();
        record.set_value("title", Some("Dune".into()));
        record.set_value("year", Some(AttributeValue::Int64(1965)));
        let id = record.id().clone();
        ctx.save().unwrap();
        let stored = ctx.record(&id).unwrap();
        assert_eq!(stored.value("year"), Some(&AttributeValue::Int32(1965)));

        stored.set_value("year", Some("nineteen".into()));
        assert!(matches!(
            ctx.save(),
            Err(EngineError::KindMismatch {
                expected: ValueKind::Int32,
                actual: ValueKind::String,
                ..
            })
        ));
    }

    #[test]
    fn record_lookup_failures() {
        let store = store();
        let other = MemoryStore::in_memory("other", crate::fixtures::catalog()).unwrap();
        let foreign = insert_book(&other, "Elsewhere", 1);
        let mut ctx = store.new_context();
        assert!(matches!(
            ctx.record(&foreign),
            Err(EngineError::ForeignRecord(_))
        ));
        let missing = RecordId::new(store.store_id(), "Book", 999);
        assert!(matches!(
            ctx.record(&missing),
            Err(EngineError::RecordNotFound(_))
        ));
        let id = insert_book(&store, "Dune", 1965);
        let wrong_entity = RecordId::new(store.store_id(), "Author", id.key());
        assert!(ctx.record(&wrong_entity).is_err());
    }

    #[test]
    fn fetch_validates_entity_and_keys() {
        let store = store();
        let ctx = store.new_context();
        assert!(matches!(
            ctx.fetch(&FetchRequest::new("Shelf")),
            Err(EngineError::UnknownEntity(_))
        ));
        let filter = NativeFilter::compile(&Predicate::equal("isbn", "x")).unwrap();
        assert!(matches!(
            ctx.fetch(&FetchRequest::new("Book").with_filter(filter)),
            Err(EngineError::Filter(_))
        ));
    }

    #[test]
    fn fetch_respects_limit() {
        let store = store();
        for year in 0..5 {
            insert_book(&store, "Same", year);
        }
        let ctx = store.new_context();
        let found = ctx
            .fetch(&FetchRequest::new("Book").with_limit(2))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].id().key() < found[1].id().key());
    }

    #[test]
    fn any_over_relationship() {
        let store = store();
        let mut ctx = store.new_context();
        let author = ctx.insert("Author").unwrap();
        author.set_value("name", Some("Frank Herbert".into()));
        let author_uri = AttributeValue::Uri(author.id().to_uri());
        let book = ctx.insert("Book").unwrap();
        book.set_value("title", Some("Dune".into()));
        book.set_value("authors", Some(AttributeValue::List(vec![author_uri])));
        ctx.save().unwrap();

        let filter = NativeFilter::parse("ANY authors.name CONTAINS[c] %@", &["herbert".into()])
            .unwrap();
        let found = store
            .new_context()
            .fetch(&FetchRequest::new("Book").with_filter(filter))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn observers_receive_committed_batches() {
        let store = store();
        let mut observer = store.add_observer();
        let id = insert_book(&store, "Dune", 1965);

        let mut ctx = store.new_context();
        ctx.record(&id).unwrap().set_value("year", Some(AttributeValue::Int32(1966)));
        let inserted = ctx.insert("Author").unwrap().id().clone();
        ctx.save().unwrap();
        ctx.delete(&inserted).unwrap();
        ctx.save().unwrap();

        let first = observer.recv().await.unwrap();
        assert_eq!(first.inserted.len(), 1);
        let second = observer.recv().await.unwrap();
        assert_eq!((second.inserted.len(), second.updated.len()), (1, 1));
        let third = observer.recv().await.unwrap();
        assert_eq!(third.deleted.len(), 1);
        assert_eq!(third.deleted[0].id(), &inserted);

        assert!(store.remove_observer(observer.id()));
        assert!(!store.remove_observer(observer.id()));
    }

    #[test]
    fn defaults_and_generated_values() {
        let schema = Schema::new(1).with_entity(
            EntityDescription::new("Note")
                .with_attribute(
                    crate::schema::AttributeDescription::new("uid", ValueKind::Uuid).generated(),
                )
                .with_attribute(
                    crate::schema::AttributeDescription::new("pinned", ValueKind::Bool)
                        .with_default(false),
                ),
        );
        let store = MemoryStore::in_memory("notes", schema).unwrap();
        let mut ctx = store.new_context();
        let note = ctx.insert("Note").unwrap();
        assert_eq!(note.value("pinned"), Some(&AttributeValue::Bool(false)));
        assert_eq!(note.value("uid").map(|v| v.kind()), Some(ValueKind::Uuid));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::on_disk(dir.path());
        let (store_id, id) = {
            let store = MemoryStore::open("catalog", crate::fixtures::catalog(), options.clone())
                .unwrap();
            (store.store_id(), insert_book(&store, "Dune", 1965))
        };
        let path = dir.path().join("catalog.tess.json");
        assert!(path.exists());

        let reopened = MemoryStore::open("catalog", crate::fixtures::catalog(), options).unwrap();
        assert_eq!(reopened.store_id(), store_id);
        let found = fetch(&reopened, Predicate::equal("title", "Dune"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), &id);
        let next = insert_book(&reopened, "Emma", 1815);
        assert!(next.key() > id.key());
    }

    #[test]
    fn non_finite_floats_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::on_disk(dir.path());
        let tags = AttributeValue::List(vec![
            AttributeValue::Double(f64::NAN),
            AttributeValue::Double(f64::INFINITY),
            AttributeValue::Float(f32::NEG_INFINITY),
        ]);
        {
            let store = MemoryStore::open("catalog", crate::fixtures::catalog(), options.clone())
                .unwrap();
            let mut ctx = store.new_context();
            let record = ctx.insert("Book").unwrap();
            Changeset::new()
                .with("title", "Dune")
                .with("tags", tags)
                .apply(record)
                .unwrap();
            ctx.save().unwrap();
        }

        let reopened = MemoryStore::open("catalog", crate::fixtures::catalog(), options).unwrap();
        let found = fetch(&reopened, Predicate::equal("title", "Dune"));
        assert_eq!(found.len(), 1);
        let Some(AttributeValue::List(items)) = found[0].value("tags") else {
            panic!("tags missing after reopen");
        };
        assert!(matches!(items[0], AttributeValue::Double(v) if v.is_nan()));
        assert_eq!(items[1], AttributeValue::Double(f64::INFINITY));
        assert_eq!(items[2], AttributeValue::Float(f32::NEG_INFINITY));
    }
}
