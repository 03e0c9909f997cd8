use std::collections::BTreeMap;
use std::sync::Arc;

use tess_types::{AttributeValue, Record, RecordId};

use crate::schema::EntityDescription;

/// A record as the engine holds it: identity, entity description and the
/// fields currently set.
///
/// Absent keys are simply missing from `values`; null is never stored.
#[derive(Clone, Debug)]
pub struct ManagedRecord {
    id: RecordId,
    entity: Arc<EntityDescription>,
    values: BTreeMap<String, AttributeValue>,
}

impl ManagedRecord {
    pub fn new(id: RecordId, entity: Arc<EntityDescription>) -> Self {
        Self {
            id,
            entity,
            values: BTreeMap::new(),
        }
    }

    pub(crate) fn with_values(
        id: RecordId,
        entity: Arc<EntityDescription>,
        values: BTreeMap<String, AttributeValue>,
    ) -> Self {
        Self { id, entity, values }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn entity(&self) -> &EntityDescription {
        &self.entity
    }

    pub(crate) fn entity_arc(&self) -> &Arc<EntityDescription> {
        &self.entity
    }

    pub fn values(&self) -> &BTreeMap<String, AttributeValue> {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut BTreeMap<String, AttributeValue> {
        &mut self.values
    }

    /// Field-wise comparison, ignoring identity.
    pub fn same_values(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Record for ManagedRecord {
    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn entity_name(&self) -> &str {
        &self.entity.name
    }

    fn declared_keys(&self) -> Vec<&str> {
        self.entity.keys().collect()
    }

    fn is_declared(&self, key: &str) -> bool {
        self.entity.declares(key)
    }

    fn value(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    fn set_value(&mut self, key: &str, value: Option<AttributeValue>) {
        match value {
            Some(v) if !v.is_null() => {
                self.values.insert(key.to_string(), v);
            }
            _ => {
                self.values.remove(key);
            }
        }
    }
}
