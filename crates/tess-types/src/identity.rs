use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValueError;
use crate::value::Uri;

/// URI scheme used for the textual form of a [`RecordId`].
pub const RECORD_URI_SCHEME: &str = "tess";

/// Identity of one persistent store.
///
/// Generated once when a store is created and kept with its data, so record
/// identifiers from one store never resolve against another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Generate a fresh, time-ordered store identity (UUID v7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable identifier of a persisted record.
///
/// Opaque to callers; the only handle that survives across calls and
/// sessions. The textual form is `tess://<store>/<entity>/p<key>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    store: StoreId,
    entity: String,
    key: u64,
}

impl RecordId {
    pub fn new(store: StoreId, entity: impl Into<String>, key: u64) -> Self {
        Self {
            store,
            entity: entity.into(),
            key,
        }
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    /// Name of the entity the record belongs to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Store-local primary key.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// The URI form, suitable for storing in a to-many relationship list.
    pub fn to_uri(&self) -> Uri {
        Uri::new_unchecked(self.to_string())
    }

    pub fn from_uri(uri: &Uri) -> Result<Self, ValueError> {
        uri.as_str().parse()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({}/p{})", self.entity, self.key)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{RECORD_URI_SCHEME}://{}/{}/p{}",
            self.store, self.entity, self.key
        )
    }
}

impl FromStr for RecordId {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValueError::InvalidRecordId(s.to_string());
        let rest = s
            .strip_prefix(RECORD_URI_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(invalid)?;
        let mut parts = rest.splitn(3, '/');
        let (Some(store), Some(entity), Some(key)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let store = Uuid::parse_str(store).map_err(|_| invalid())?;
        let key = key
            .strip_prefix('p')
            .and_then(|k| k.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        if entity.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(StoreId::from_uuid(store), entity, key))
    }
}
