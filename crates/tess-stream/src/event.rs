use serde::{Deserialize, Serialize};
use tess_engine::{ChangeBatch, ManagedRecord};
use tess_types::{RecordId, Snapshot};

/// What happened to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Inserted,
    Updated,
    Deleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// One committed change to one record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Entity name of the changed record.
    pub entity_kind: String,
    /// Record state after the change; for deletions, the last committed state.
    pub snapshot: Snapshot,
}

impl Event {
    fn from_record(kind: EventKind, record: &ManagedRecord) -> Self {
        Self {
            kind,
            entity_kind: record.entity().name.clone(),
            snapshot: Snapshot::capture(record),
        }
    }

    pub fn record_id(&self) -> &RecordId {
        self.snapshot.record_id()
    }
}

/// Unpack a batch into events: inserted, then updated, then deleted.
pub fn unpack(batch: &ChangeBatch) -> Vec<Event> {
    let mut events = Vec::with_capacity(batch.len());
    events.extend(batch.inserted.iter().map(|r| Event::from_record(EventKind::Inserted, r)));
    events.extend(batch.updated.iter().map(|r| Event::from_record(EventKind::Updated, r)));
    events.extend(batch.deleted.iter().map(|r| Event::from_record(EventKind::Deleted, r)));
    events
}
