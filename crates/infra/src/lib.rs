//! Infrastructure layer: persistence, locking, configuration and the
//! transactional ledger service.

pub mod config;
pub mod locks;
pub mod service;
pub mod store;


pub use config::LedgerConfig;
pub use locks::{KeyGuard, KeyedLocks};
pub use service::{ExternalIngested, LedgerContext, LedgerEvent, LedgerNotice, LedgerService};
pub use store::{
    InMemoryMovementStore, LedgerWrite, MovementFilter, MovementStore, MovementWrite, SnapshotWrite,
    StoreError, StoredMovement,
};
