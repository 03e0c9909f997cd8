use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tess_engine::PersistentStore;
use tess_gate::GateResult;
use tess_predicate::Predicate;
use tess_stream::Subscription;
use tess_types::{AttributeValue, Changeset, RecordId, Snapshot, StoreId};
use uuid::Uuid;

use crate::client::StoreClient;

/// A client that never touches a store.
///
/// Reads come back empty, writes echo their changeset under a placeholder
/// identifier, and subscriptions end immediately. For previews and wiring
/// code that needs a [`StoreClient`] without a backing store.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreviewClient;

fn echo(entity: &str, changeset: &Changeset) -> Snapshot {
    let id = changeset
        .target_id()
        .cloned()
        .unwrap_or_else(|| RecordId::new(StoreId::from_uuid(Uuid::nil()), entity, 0));
    Snapshot::new(id, present(changeset))
}

/// Assigned values of `changeset`; nulls clear a field, so they are left out.
fn present(changeset: &Changeset) -> BTreeMap<String, AttributeValue> {
    changeset
        .attributes()
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl StoreClient for PreviewClient {
    async fn initialize(&self, _name: &str, _in_memory: bool) -> GateResult<()> {
        Ok(())
    }

    async fn initialize_with_handle(&self, _store: Arc<dyn PersistentStore>) -> GateResult<()> {
        Ok(())
    }

    async fn fetch(&self, _entity: &str, _predicate: Option<Predicate>) -> GateResult<Vec<Snapshot>> {
        Ok(Vec::new())
    }

    async fn exists(&self, _entity: &str, _predicate: Predicate) -> GateResult<Option<Snapshot>> {
        Ok(None)
    }

    async fn insert(&self, entity: &str, changeset: Changeset) -> GateResult<Snapshot> {
        Ok(echo(entity, &changeset))
    }

    async fn update(&self, id: &RecordId, changeset: Changeset) -> GateResult<Snapshot> {
        Ok(Snapshot::new(id.clone(), present(&changeset)))
    }

    async fn delete(&self, _id: &RecordId) -> GateResult<()> {
        Ok(())
    }

    async fn observe_changes(&self) -> GateResult<Subscription> {
        Ok(Subscription::empty())
    }
}
