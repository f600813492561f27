//! Persistence collaborator for movement records and stock snapshots.

mod in_memory;
mod r#trait;

pub use in_memory::InMemoryMovementStore;
pub use r#trait::{
    LedgerWrite, MovementFilter, MovementStore, MovementWrite, SnapshotWrite, StoreError,
    StoredMovement,
};
