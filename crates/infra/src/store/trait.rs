use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use stockledger_core::{ExpectedVersion, LedgerError, LocationRef, ProductId, RecordId, RecordKind};
use stockledger_inventory::{MovementRecord, ReferenceKey, StockKey, StockSnapshot};

/// A record as persisted, with its write version (+1 per write).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMovement {
    pub record: MovementRecord,
    pub version: u64,
}

/// Narrowing for `list_movements`. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub kinds: Vec<RecordKind>,
    /// Matches either leg.
    pub location: Option<LocationRef>,
    pub product_id: Option<ProductId>,
    pub reference: Option<ReferenceKey>,
    pub include_deleted: bool,
}

impl MovementFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, soft-deleted ones included.
    pub fn everything() -> Self {
        Self {
            include_deleted: true,
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn location(mut self, location: LocationRef) -> Self {
        self.location = Some(location);
        self
    }

    pub fn product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn reference(mut self, reference: ReferenceKey) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(&self, record: &MovementRecord) -> bool {
        if !self.include_deleted && record.is_excluded() {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&record.id.kind) {
            return false;
        }
        if let Some(location) = self.location {
            if record.from_location != Some(location) && record.to_location != Some(location) {
                return false;
            }
        }
        if let Some(product_id) = self.product_id {
            if !record.items.iter().any(|i| i.product_id == product_id) {
                return false;
            }
        }
        if let Some(reference) = &self.reference {
            if &ReferenceKey::of(record) != reference {
                return false;
            }
        }
        true
    }
}

/// A record write guarded by the record's current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementWrite {
    pub record: MovementRecord,
    pub expected: ExpectedVersion,
}

/// A snapshot write guarded by the snapshot's current `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotWrite {
    pub snapshot: StockSnapshot,
    pub expected: ExpectedVersion,
}

/// One atomic unit: record writes, snapshot writes and an optional dedupe key.
///
/// Either every expectation holds and everything is written, or nothing is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerWrite {
    pub movements: Vec<MovementWrite>,
    pub snapshots: Vec<SnapshotWrite>,
    /// Remembered against the first record of the write.
    pub dedupe_key: Option<Uuid>,
}

impl LedgerWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn movement(mut self, record: MovementRecord, expected: ExpectedVersion) -> Self {
        self.movements.push(MovementWrite { record, expected });
        self
    }

    pub fn snapshot(mut self, snapshot: StockSnapshot, expected: ExpectedVersion) -> Self {
        self.snapshots.push(SnapshotWrite { snapshot, expected });
        self
    }

    pub fn dedupe(mut self, key: Option<Uuid>) -> Self {
        self.dedupe_key = key;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("record {0} not found")]
    NotFound(RecordId),

    #[error("dedupe key {key} already committed for {record}")]
    DuplicateKey { key: Uuid, record: RecordId },

    #[error("invalid write: {0}")]
    InvalidWrite(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => LedgerError::NotFound(id),
            StoreError::Conflict(_) | StoreError::DuplicateKey { .. } => LedgerError::Conflict(value.to_string()),
            StoreError::InvalidWrite(_) | StoreError::Serialization(_) | StoreError::Unavailable(_) => {
                LedgerError::Storage(value.to_string())
            }
        }
    }
}

/// Record and snapshot persistence.
///
/// Implementations must give read-your-writes consistency and apply a
/// [`LedgerWrite`] atomically.
pub trait MovementStore: Send + Sync {
    fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<MovementRecord>, StoreError>;

    fn get_movement(&self, id: RecordId) -> Result<Option<StoredMovement>, StoreError>;

    /// Single guarded record write; returns the new version.
    fn write_movement(&self, record: MovementRecord, expected: ExpectedVersion) -> Result<u64, StoreError>;

    fn write_snapshot(&self, snapshot: StockSnapshot, expected: ExpectedVersion) -> Result<(), StoreError>;

    fn snapshot(&self, key: &StockKey) -> Result<Option<StockSnapshot>, StoreError>;

    fn list_snapshots(&self) -> Result<Vec<StockSnapshot>, StoreError>;

    /// Swap the whole snapshot table.
    ///
    /// `expected` must name every stored key at its current version, otherwise
    /// the swap fails with a conflict and nothing changes.
    fn replace_snapshots(
        &self,
        expected: &BTreeMap<StockKey, u64>,
        snapshots: Vec<StockSnapshot>,
    ) -> Result<(), StoreError>;

    /// Next unused id in a kind's own sequence.
    fn next_id(&self, kind: RecordKind) -> Result<RecordId, StoreError>;

    /// Record a dedupe key was committed for, if any.
    fn dedupe_record(&self, key: Uuid) -> Result<Option<RecordId>, StoreError>;

    fn commit(&self, write: LedgerWrite) -> Result<(), StoreError>;
}

impl<S> MovementStore for Arc<S>
where
    S: MovementStore + ?Sized,
{
    fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<MovementRecord>, StoreError> {
        (**self).list_movements(filter)
    }

    fn get_movement(&self, id: RecordId) -> Result<Option<StoredMovement>, StoreError> {
        (**self).get_movement(id)
    }

    fn write_movement(&self, record: MovementRecord, expected: ExpectedVersion) -> Result<u64, StoreError> {
        (**self).write_movement(record, expected)
    }

    fn write_snapshot(&self, snapshot: StockSnapshot, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).write_snapshot(snapshot, expected)
    }

    fn snapshot(&self, key: &StockKey) -> Result<Option<StockSnapshot>, StoreError> {
        (**self).snapshot(key)
    }

    fn list_snapshots(&self) -> Result<Vec<StockSnapshot>, StoreError> {
        (**self).list_snapshots()
    }

    fn replace_snapshots(
        &self,
        expected: &BTreeMap<StockKey, u64>,
        snapshots: Vec<StockSnapshot>,
    ) -> Result<(), StoreError> {
        (**self).replace_snapshots(expected, snapshots)
    }

    fn next_id(&self, kind: RecordKind) -> Result<RecordId, StoreError> {
        (**self).next_id(kind)
    }

    fn dedupe_record(&self, key: Uuid) -> Result<Option<RecordId>, StoreError> {
        (**self).dedupe_record(key)
    }

    fn commit(&self, write: LedgerWrite) -> Result<(), StoreError> {
        (**self).commit(write)
    }
}
