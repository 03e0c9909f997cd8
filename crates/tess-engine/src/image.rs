use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tess_types::{AttributeValue, RecordId, StoreId};
use tracing::warn;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::record::ManagedRecord;
use crate::schema::{narrow, EntityDescription, Schema};

/// Version of the on-disk layout below.
pub(crate) const IMAGE_FORMAT: u32 = 1;

/// Single-file JSON image of a store.
///
/// ```text
/// { "format": 1, "store_id": "<uuid>", "schema_version": 1,
///   "next_key": 17, "records": [ { "entity", "key", "values" } ] }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoreImage {
    pub format: u32,
    pub store_id: Uuid,
    pub schema_version: u32,
    pub next_key: u64,
    pub records: Vec<StoredRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub entity: String,
    pub key: u64,
    pub values: BTreeMap<String, AttributeValue>,
}

impl StoreImage {
    pub fn capture(
        store: StoreId,
        schema_version: u32,
        next_key: u64,
        records: &BTreeMap<u64, ManagedRecord>,
    ) -> Self {
        Self {
            format: IMAGE_FORMAT,
            store_id: *store.as_uuid(),
            schema_version,
            next_key,
            records: records
                .values()
                .map(|r| StoredRecord {
                    entity: r.entity().name.clone(),
                    key: r.id().key(),
                    values: r.values().clone(),
                })
                .collect(),
        }
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let file = fs::File::open(path)?;
        let image: Self = serde_json::from_reader(BufReader::new(file))?;
        if image.format != IMAGE_FORMAT {
            return Err(EngineError::Serialization(format!(
                "{}: unsupported image format {}",
                path.display(),
                image.format
            )));
        }
        Ok(image)
    }

    /// Write the image next to `path` and rename it into place.
    pub fn write(&self, path: &Path) -> EngineResult<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| EngineError::Io(e.error))?;
        Ok(())
    }

    /// Rebuild the record map against the current schema.
    ///
    /// Records of undeclared entities, undeclared keys and values whose kind
    /// no longer fits are dropped. With `automatic` off, a schema version
    /// change is an error instead.
    pub fn migrate(
        self,
        store_name: &str,
        schema: &Schema,
        entities: &HashMap<String, Arc<EntityDescription>>,
        automatic: bool,
    ) -> EngineResult<BTreeMap<u64, ManagedRecord>> {
        if self.schema_version != schema.version && !automatic {
            return Err(EngineError::MigrationRequired {
                store: store_name.to_string(),
                found: self.schema_version,
                expected: schema.version,
            });
        }
        let store = StoreId::from_uuid(self.store_id);
        let mut records = BTreeMap::new();
        for stored in self.records {
            let Some(entity) = entities.get(&stored.entity) else {
                warn!(entity = %stored.entity, key = stored.key, "dropping record of undeclared entity");
                continue;
            };
            let mut values = BTreeMap::new();
            for (key, value) in stored.values {
                match migrate_value(entity, &key, &value) {
                    Some(value) => {
                        values.insert(key, value);
                    }
                    None => {
                        warn!(entity = %entity.name, %key, "dropping incompatible value");
                    }
                }
            }
            let id = RecordId::new(store, &stored.entity, stored.key);
            records.insert(
                stored.key,
                ManagedRecord::with_values(id, Arc::clone(entity), values),
            );
        }
        Ok(records)
    }
}

fn migrate_value(
    entity: &EntityDescription,
    key: &str,
    value: &AttributeValue,
) -> Option<AttributeValue> {
    if let Some(attr) = entity.attribute(key) {
        return if attr.accepts(value) {
            narrow(value, attr.kind)
        } else {
            None
        };
    }
    entity
        .relationship(key)
        .filter(|rel| rel.accepts(value))
        .map(|_| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDescription;
    use tess_types::ValueKind;

    fn entities(schema: &Schema) -> HashMap<String, Arc<EntityDescription>> {
        schema
            .entities
            .iter()
            .map(|e| (e.name.clone(), Arc::new(e.clone())))
            .collect()
    }

    fn image() -> StoreImage {
        let mut values = BTreeMap::new();
        values.insert("title".to_string(), AttributeValue::from("Dune"));
        values.insert("year".to_string(), AttributeValue::Int64(1965));
        values.insert("isbn".to_string(), AttributeValue::from("0441013597"));
        StoreImage {
            format: IMAGE_FORMAT,
            store_id: Uuid::now_v7(),
            schema_version: 1,
            next_key: 3,
            records: vec![
                StoredRecord {
                    entity: "Book".into(),
                    key: 1,
                    values,
                },
                StoredRecord {
                    entity: "Shelf".into(),
                    key: 2,
                    values: BTreeMap::new(),
                },
            ],
        }
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.tess.json");
        image().write(&path).unwrap();
        let loaded = StoreImage::load(&path).unwrap();
        assert_eq!(loaded.next_key, 3);
        assert_eq!(loaded.records.len(), 2);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tess.json");
        let mut img = image();
        img.format = 99;
        img.write(&path).unwrap();
        assert!(matches!(
            StoreImage::load(&path),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn migration_drops_undeclared_data() {
        let schema = crate::fixtures::catalog();
        let records = image()
            .migrate("catalog", &schema, &entities(&schema), true)
            .unwrap();
        assert_eq!(records.len(), 1);
        let book = &records[&1];
        assert!(book.values().get("isbn").is_none());
        assert_eq!(book.values().get("year"), Some(&AttributeValue::Int32(1965)));
    }

    #[test]
    fn migration_drops_mismatched_kinds() {
        let schema = Schema::new(2).with_entity(
            EntityDescription::new("Book")
                .with_attribute(AttributeDescription::new("title", ValueKind::Int32)),
        );
        let records = image()
            .migrate("catalog", &schema, &entities(&schema), true)
            .unwrap();
        assert!(records[&1].values().is_empty());
    }

    #[test]
    fn version_change_without_automatic_migration_fails() {
        let schema = Schema::new(2).with_entity(EntityDescription::new("Book"));
        let err = image()
            .migrate("catalog", &schema, &entities(&schema), false)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MigrationRequired { found: 1, expected: 2, .. }
        ));
    }
}
