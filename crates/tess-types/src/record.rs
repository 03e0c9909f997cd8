//! Record snapshots and changesets.
//!
//! A [`Snapshot`] is the read side: an immutable copy of a record's present
//! attributes. A [`Changeset`] is the write side: a sparse set of
//! assignments merged into a live [`Record`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ValueError, ValueResult};
use crate::identity::RecordId;
use crate::value::{AttributeValue, FromAttributeValue};

/// Attribute access to a live record owned by a persistence engine.
///
/// Keys are plain strings validated against the record's runtime schema.
/// Both attributes and relationships count as declared keys; to-many
/// relationships hold an [`AttributeValue::List`].
pub trait Record {
    fn record_id(&self) -> &RecordId;

    /// Name of the entity this record is an instance of.
    fn entity_name(&self) -> &str;

    /// Every key declared on the record's entity, in schema order.
    fn declared_keys(&self) -> Vec<&str>;

    fn is_declared(&self, key: &str) -> bool {
        self.declared_keys().contains(&key)
    }

    /// The current value of `key`, or `None` when the field is absent.
    fn value(&self, key: &str) -> Option<&AttributeValue>;

    /// Assign or, with `None`, clear a declared field.
    fn set_value(&mut self, key: &str, value: Option<AttributeValue>);
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only copy of a persisted record's attributes at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    record_id: RecordId,
    attributes: BTreeMap<String, AttributeValue>,
}

impl Snapshot {
    pub fn new(record_id: RecordId, attributes: BTreeMap<String, AttributeValue>) -> Self {
        Self {
            record_id,
            attributes,
        }
    }

    /// Capture every present, declared value of a live record.
    ///
    /// Absent and null fields are skipped, never defaulted.
    pub fn capture<R: Record + ?Sized>(record: &R) -> Self {
        let attributes = record
            .declared_keys()
            .into_iter()
            .filter_map(|key| {
                record
                    .value(key)
                    .filter(|v| !v.is_null())
                    .map(|v| (key.to_string(), v.clone()))
            })
            .collect();
        Self::new(record.record_id().clone(), attributes)
    }

    /// Identifier of the captured record.
    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// Entity of the captured record.
    pub fn entity(&self) -> &str {
        self.record_id.entity()
    }

    /// Captured values by key. Never holds [`AttributeValue::Null`].
    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    /// Raw value of `key`; `None` when the field was absent or null.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Typed read of one attribute; `None` when absent or of another kind.
    pub fn get_as<T: FromAttributeValue>(&self, key: &str) -> Option<T> {
        self.attributes.get(key).and_then(AttributeValue::get)
    }

    /// Number of captured fields.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Split into identifier and values.
    pub fn into_parts(self) -> (RecordId, BTreeMap<String, AttributeValue>) {
        (self.record_id, self.attributes)
    }
}

// ---------------------------------------------------------------------------
// Changeset
// ---------------------------------------------------------------------------

/// Sparse set of field assignments applied to a record.
///
/// Merge, not replace: keys not assigned here are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    target_id: Option<RecordId>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl Changeset {
    /// An empty changeset for a record that does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty changeset describing an update to `target`.
    pub fn for_record(target: RecordId) -> Self {
        Self {
            target_id: Some(target),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Assign a type-erased native value, rejecting unsupported kinds.
    pub fn set_native<T: std::any::Any>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> ValueResult<&mut Self> {
        let value = AttributeValue::wrap(value)?;
        Ok(self.set(key, value))
    }

    /// Mark `key` to be cleared on apply.
    pub fn clear(&mut self, key: impl Into<String>) -> &mut Self {
        self.set(key, AttributeValue::Null)
    }

    /// Drop a pending assignment; the field will be left untouched.
    pub fn unset(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }

    pub fn target_id(&self) -> Option<&RecordId> {
        self.target_id.as_ref()
    }

    pub fn set_target_id(&mut self, target: Option<RecordId>) {
        self.target_id = target;
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Merge this changeset into `target`.
    ///
    /// Null clears the field, a list replaces the collection wholesale,
    /// anything else overwrites. All keys are checked before any is
    /// written, so a rejected changeset leaves the target unchanged.
    pub fn apply<R: Record + ?Sized>(&self, target: &mut R) -> ValueResult<()> {
        self.check_declared(target)?;
        for (key, value) in &self.attributes {
            let value = (!value.is_null()).then(|| value.clone());
            target.set_value(key, value);
        }
        Ok(())
    }

    /// Remove, from each list-valued field of `target`, every element
    /// present in this changeset's list for that key.
    ///
    /// Scalar assignments are ignored. Applying the same diff twice yields
    /// the same collection as applying it once.
    pub fn apply_diff<R: Record + ?Sized>(&self, target: &mut R) -> ValueResult<()> {
        self.check_declared(target)?;
        for (key, value) in &self.attributes {
            let AttributeValue::List(removals) = value else {
                continue;
            };
            let Some(AttributeValue::List(existing)) = target.value(key) else {
                continue;
            };
            let remaining: Vec<AttributeValue> = existing
                .iter()
                .filter(|item| !removals.contains(item))
                .cloned()
                .collect();
            target.set_value(key, Some(AttributeValue::List(remaining)));
        }
        Ok(())
    }

    fn check_declared<R: Record + ?Sized>(&self, target: &R) -> ValueResult<()> {
        match self.attributes.keys().find(|key| !target.is_declared(key)) {
            Some(key) => Err(ValueError::InvalidAttribute(key.clone())),
            None => Ok(()),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Changeset
where
    K: Into<String>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut changeset = Self::new();
        for (key, value) in iter {
            changeset.set(key, value);
        }
        changeset
    }
}
