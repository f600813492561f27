use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use stockledger_core::{ExpectedVersion, RecordId, RecordKind};
use stockledger_inventory::{MovementRecord, StockKey, StockSnapshot};

use super::r#trait::{LedgerWrite, MovementFilter, MovementStore, StoreError, StoredMovement};

#[derive(Debug, Default)]
struct State {
    movements: BTreeMap<RecordId, StoredMovement>,
    snapshots: BTreeMap<StockKey, StockSnapshot>,
    dedupe: HashMap<Uuid, RecordId>,
    last_ids: HashMap<RecordKind, u64>,
}

impl State {
    fn put_movement(&mut self, record: MovementRecord) -> u64 {
        let id = record.id;
        let version = self.movements.get(&id).map_or(1, |m| m.version + 1);
        self.movements.insert(id, StoredMovement { record, version });
        let last = self.last_ids.entry(id.kind).or_default();
        *last = (*last).max(id.id);
        version
    }
}

fn check(expected: ExpectedVersion, actual: Option<u64>, what: impl core::fmt::Display) -> Result<(), StoreError> {
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{what}: expected {expected:?}, found {actual:?}"
        )))
    }
}

/// In-memory record and snapshot store.
///
/// Intended for tests/dev. Every operation takes one lock, so commits are
/// trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryMovementStore {
    state: RwLock<State>,
}

impl InMemoryMovementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-existing records (e.g. history loaded from another system).
    ///
    /// Later duplicates of an id overwrite earlier ones.
    pub fn with_records(records: impl IntoIterator<Item = MovementRecord>) -> Self {
        let mut state = State::default();
        for record in records {
            state.put_movement(record);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Seed from a JSON array of records.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let records: Vec<MovementRecord> =
            serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::with_records(records))
    }

    /// Export every stored record as a JSON array, ordered by id.
    pub fn to_json(&self) -> Result<String, StoreError> {
        let state = self.read()?;
        let records: Vec<&MovementRecord> = state.movements.values().map(|m| &m.record).collect();
        serde_json::to_string(&records).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl MovementStore for InMemoryMovementStore {
    fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<MovementRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .movements
            .values()
            .map(|m| &m.record)
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn get_movement(&self, id: RecordId) -> Result<Option<StoredMovement>, StoreError> {
        Ok(self.read()?.movements.get(&id).cloned())
    }

    fn write_movement(&self, record: MovementRecord, expected: ExpectedVersion) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let current = state.movements.get(&record.id).map(|m| m.version);
        check(expected, current, record.id)?;
        Ok(state.put_movement(record))
    }

    fn write_snapshot(&self, snapshot: StockSnapshot, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let current = state.snapshots.get(&snapshot.key).map(|s| s.version);
        check(expected, current, snapshot.key)?;
        state.snapshots.insert(snapshot.key, snapshot);
        Ok(())
    }

    fn snapshot(&self, key: &StockKey) -> Result<Option<StockSnapshot>, StoreError> {
        Ok(self.read()?.snapshots.get(key).cloned())
    }

    fn list_snapshots(&self) -> Result<Vec<StockSnapshot>, StoreError> {
        Ok(self.read()?.snapshots.values().cloned().collect())
    }

    fn replace_snapshots(
        &self,
        expected: &BTreeMap<StockKey, u64>,
        snapshots: Vec<StockSnapshot>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let current: BTreeMap<StockKey, u64> = state.snapshots.iter().map(|(k, s)| (*k, s.version)).collect();
        if &current != expected {
            return Err(StoreError::Conflict(format!(
                "snapshot table changed ({} stored, {} expected)",
                current.len(),
                expected.len()
            )));
        }
        state.snapshots = snapshots.into_iter().map(|s| (s.key, s)).collect();
        Ok(())
    }

    fn next_id(&self, kind: RecordKind) -> Result<RecordId, StoreError> {
        let mut state = self.write()?;
        let last = state.last_ids.entry(kind).or_default();
        *last += 1;
        Ok(RecordId::new(kind, *last))
    }

    fn dedupe_record(&self, key: Uuid) -> Result<Option<RecordId>, StoreError> {
        Ok(self.read()?.dedupe.get(&key).copied())
    }

    fn commit(&self, write: LedgerWrite) -> Result<(), StoreError> {
        let mut state = self.write()?;

        let first = write.movements.first().map(|w| w.record.id);
        if let Some(key) = write.dedupe_key {
            if let Some(record) = state.dedupe.get(&key) {
                return Err(StoreError::DuplicateKey { key, record: *record });
            }
            if first.is_none() {
                return Err(StoreError::InvalidWrite("dedupe key without a record".to_string()));
            }
        }

        // Validate the whole batch before touching anything.
        let mut ids = HashSet::with_capacity(write.movements.len());
        for w in &write.movements {
            if !ids.insert(w.record.id) {
                return Err(StoreError::InvalidWrite(format!("{} written twice", w.record.id)));
            }
            check(w.expected, state.movements.get(&w.record.id).map(|m| m.version), w.record.id)?;
        }
        let mut keys = HashSet::with_capacity(write.snapshots.len());
        for w in &write.snapshots {
            if !keys.insert(w.snapshot.key) {
                return Err(StoreError::InvalidWrite(format!("{} written twice", w.snapshot.key)));
            }
            check(w.expected, state.snapshots.get(&w.snapshot.key).map(|s| s.version), w.snapshot.key)?;
        }

        for w in write.movements {
            state.put_movement(w.record);
        }
        for w in write.snapshots {
            state.snapshots.insert(w.snapshot.key, w.snapshot);
        }
        if let (Some(key), Some(record)) = (write.dedupe_key, first) {
            state.dedupe.insert(key, record);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{LocationRef, ProductId};
    use stockledger_inventory::{InventoryType, MovementAction, MovementItem};

    fn stock_in(id: u64, qty: u64) -> MovementRecord {
        MovementRecord::new(RecordId::movement(id), InventoryType::StockIn, MovementAction::Add)
            .with_item(MovementItem::new(ProductId(1), None, qty))
            .destination(LocationRef::warehouse(1))
    }

    fn key() -> StockKey {
        StockKey::new(LocationRef::warehouse(1), ProductId(1), None)
    }

    fn snapshot(quantity: u64, version: u64) -> StockSnapshot {
        let mut s = StockSnapshot::empty(key());
        s.quantity = quantity;
        s.available_quantity = quantity;
        s.version = version;
        s
    }

    #[test]
    fn writes_bump_versions() {
        let store = InMemoryMovementStore::new();
        assert_eq!(store.write_movement(stock_in(1, 5), ExpectedVersion::Absent).unwrap(), 1);
        assert_eq!(store.write_movement(stock_in(1, 6), ExpectedVersion::Exact(1)).unwrap(), 2);

        let err = store.write_movement(stock_in(1, 7), ExpectedVersion::Exact(1)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_movement(RecordId::movement(1)).unwrap().unwrap().record.items[0].quantity, 6);
    }

    #[test]
    fn failed_commit_writes_nothing() {
        let store = InMemoryMovementStore::new();
        store.write_snapshot(snapshot(10, 1), ExpectedVersion::Absent).unwrap();

        let write = LedgerWrite::new()
            .movement(stock_in(1, 5), ExpectedVersion::Absent)
            .snapshot(snapshot(15, 2), ExpectedVersion::Exact(7));
        assert!(matches!(store.commit(write), Err(StoreError::Conflict(_))));

        assert!(store.get_movement(RecordId::movement(1)).unwrap().is_none());
        assert_eq!(store.snapshot(&key()).unwrap().unwrap().quantity, 10);
    }

    #[test]
    fn dedupe_keys_are_committed_once() {
        let store = InMemoryMovementStore::new();
        let dedupe = Uuid::now_v7();
        store
            .commit(LedgerWrite::new().movement(stock_in(1, 5), ExpectedVersion::Absent).dedupe(Some(dedupe)))
            .unwrap();
        assert_eq!(store.dedupe_record(dedupe).unwrap(), Some(RecordId::movement(1)));

        let again = LedgerWrite::new().movement(stock_in(2, 5), ExpectedVersion::Absent).dedupe(Some(dedupe));
        assert!(matches!(store.commit(again), Err(StoreError::DuplicateKey { .. })));
        assert!(store.get_movement(RecordId::movement(2)).unwrap().is_none());
    }

    #[test]
    fn id_sequences_are_per_kind() {
        let store = InMemoryMovementStore::with_records([stock_in(41, 1)]);
        assert_eq!(store.next_id(RecordKind::Movement).unwrap(), RecordId::movement(42));
        assert_eq!(store.next_id(RecordKind::Movement).unwrap(), RecordId::movement(43));
        assert_eq!(store.next_id(RecordKind::Sale).unwrap(), RecordId::sale(1));
    }

    #[test]
    fn replace_requires_an_unchanged_table() {
        let store = InMemoryMovementStore::new();
        store.write_snapshot(snapshot(10, 3), ExpectedVersion::Absent).unwrap();

        let stale = BTreeMap::from([(key(), 2)]);
        assert!(store.replace_snapshots(&stale, vec![snapshot(1, 4)]).is_err());

        let current = BTreeMap::from([(key(), 3)]);
        store.replace_snapshots(&current, vec![snapshot(1, 4)]).unwrap();
        assert_eq!(store.snapshot(&key()).unwrap().unwrap().quantity, 1);
    }

    #[test]
    fn listing_hides_deleted_records_unless_asked() {
        let mut deleted = stock_in(2, 3);
        deleted.is_deleted = true;
        let store = InMemoryMovementStore::with_records([stock_in(1, 5), deleted]);

        assert_eq!(store.list_movements(&MovementFilter::new()).unwrap().len(), 1);
        assert_eq!(store.list_movements(&MovementFilter::everything()).unwrap().len(), 2);
        assert!(
            store
                .list_movements(&MovementFilter::new().kind(RecordKind::Sale))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn json_export_round_trips_records() {
        let store = InMemoryMovementStore::with_records([stock_in(1, 5), stock_in(2, 7)]);
        let json = store.to_json().unwrap();
        assert!(json.contains("\"inventoryType\""));

        let restored = InMemoryMovementStore::from_json(&json).unwrap();
        assert_eq!(
            restored.list_movements(&MovementFilter::everything()).unwrap(),
            store.list_movements(&MovementFilter::everything()).unwrap()
        );
        assert!(matches!(
            InMemoryMovementStore::from_json("{not json"),
            Err(StoreError::Serialization(_))
        ));
    }
}
