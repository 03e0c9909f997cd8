use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tess_types::{AttributeValue, ValueKind};

use crate::error::{EngineError, EngineResult};

/// The data model of a store: every entity it can hold.
///
/// Deserializes from TOML or JSON:
///
/// ```toml
/// version = 1
///
/// [[entities]]
/// name = "Book"
///
/// [[entities.attributes]]
/// name = "title"
/// kind = "string"
/// optional = false
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Bumped whenever the model changes; compared against the stored image.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

fn default_version() -> u32 {
    1
}

fn default_optional() -> bool {
    true
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(default_version())
    }
}

impl Schema {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            entities: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Check names are unique and relationships point at declared entities.
    pub fn validate(&self) -> EngineResult<()> {
        let mut names = HashSet::new();
        for entity in &self.entities {
            if entity.name.is_empty() {
                return Err(EngineError::Schema("entity with empty name".into()));
            }
            if !names.insert(entity.name.as_str()) {
                return Err(EngineError::Schema(format!(
                    "duplicate entity {}",
                    entity.name
                )));
            }
            entity.validate()?;
        }
        for entity in &self.entities {
            for rel in &entity.relationships {
                if !names.contains(rel.destination.as_str()) {
                    return Err(EngineError::Schema(format!(
                        "{}.{} points at unknown entity {}",
                        entity.name, rel.name, rel.destination
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Runtime description of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDescription) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Attributes first, then relationships, in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.relationships.iter().map(|r| r.name.as_str()))
    }

    pub fn declares(&self, key: &str) -> bool {
        self.keys().any(|k| k == key)
    }

    fn validate(&self) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for key in self.keys() {
            if !seen.insert(key) {
                return Err(EngineError::Schema(format!(
                    "{} declares {key} twice",
                    self.name
                )));
            }
        }
        for attr in &self.attributes {
            if let Some(default) = &attr.default {
                if !default.is_null() && default.kind() != attr.kind {
                    return Err(EngineError::Schema(format!(
                        "default for {}.{} is {}, declared {}",
                        self.name,
                        attr.name,
                        default.kind(),
                        attr.kind
                    )));
                }
            }
            if attr.generated && !matches!(attr.kind, ValueKind::Uuid | ValueKind::Date) {
                return Err(EngineError::Schema(format!(
                    "{}.{} cannot be generated for kind {}",
                    self.name, attr.name, attr.kind
                )));
            }
        }
        Ok(())
    }
}

/// A typed attribute on an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default = "default_optional")]
    pub optional: bool,
    /// Assigned when a record is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<AttributeValue>,
    /// Filled by the engine on creation: a v7 UUID or the current time.
    #[serde(default)]
    pub generated: bool,
}

impl AttributeDescription {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
            default: None,
            generated: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<AttributeValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Whether `value` may be stored in this attribute.
    ///
    /// Numeric values are accepted by any numeric kind and narrowed on write.
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        value.is_null() || value.kind() == self.kind || (value.is_numeric() && is_numeric(self.kind))
    }

    /// Initial value for a freshly created record.
    pub fn initial_value(&self) -> Option<AttributeValue> {
        if self.generated {
            return match self.kind {
                ValueKind::Uuid => Some(AttributeValue::Uuid(uuid::Uuid::now_v7())),
                ValueKind::Date => Some(AttributeValue::Date(chrono::Utc::now())),
                _ => None,
            };
        }
        self.default.clone().filter(|v| !v.is_null())
    }
}

/// A relationship from one entity to another.
///
/// To-many relationships hold a list of record URIs; to-one hold a single URI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDescription {
    pub name: String,
    pub destination: String,
    #[serde(default)]
    pub to_many: bool,
}

impl RelationshipDescription {
    pub fn to_one(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            to_many: false,
        }
    }

    pub fn to_many(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            to_many: true,
        }
    }

    pub fn accepts(&self, value: &AttributeValue) -> bool {
        match value {
            AttributeValue::Null => true,
            AttributeValue::List(items) if self.to_many => {
                items.iter().all(|v| matches!(v, AttributeValue::Uri(_)))
            }
            AttributeValue::Uri(_) => !self.to_many,
            _ => false,
        }
    }
}

pub(crate) fn is_numeric(kind: ValueKind) -> bool {
    matches!(
        kind,
        ValueKind::Int16 | ValueKind::Int32 | ValueKind::Int64 | ValueKind::Float | ValueKind::Double
    )
}

/// Convert a numeric value to the declared numeric kind.
///
/// Returns `None` when the value does not fit.
pub(crate) fn narrow(value: &AttributeValue, kind: ValueKind) -> Option<AttributeValue> {
    if value.kind() == kind || !value.is_numeric() {
        return Some(value.clone());
    }
    match kind {
        ValueKind::Int16 => i16::try_from(value.as_i64()?).ok().map(AttributeValue::Int16),
        ValueKind::Int32 => i32::try_from(value.as_i64()?).ok().map(AttributeValue::Int32),
        ValueKind::Int64 => value.as_i64().map(AttributeValue::Int64),
        ValueKind::Float => value.as_f64().map(|v| AttributeValue::Float(v as f32)),
        ValueKind::Double => value.as_f64().map(AttributeValue::Double),
        _ => Some(value.clone()),
    }
}
