//! Inventory movement ledger (pure domain).
//!
//! Classification, version grouping, stock aggregation, the movement state
//! machine and query filters. No IO, no storage: the infra crate supplies
//! records and commits the results.

pub mod classify;
pub mod ledger;
pub mod movement;
pub mod query;
pub mod remarks;
pub mod stock;
pub mod version;

pub use classify::{Classification, ColorCategory, Direction, QuantitySign, classify};
pub use ledger::{
    ConfirmMovement, CreateMovement, DeleteMovement, EditMovement, Movement, MovementCommand,
    MovementConfirmed, MovementCreated, MovementDeleted, MovementEvent, MovementPatch,
    MovementSuperseded, NewMovement, validate_movement,
};
pub use movement::{InventoryType, LedgerStatus, MovementAction, MovementItem, MovementRecord};
pub use query::{MovementQuery, SnapshotQuery, StatusFilter};
pub use remarks::{SourceHint, parse_source_hint};
pub use stock::{
    AggregationReport, Anomaly, StockBook, StockEffect, StockKey, StockSnapshot, aggregate,
    aggregate_with_report, effects_of, is_effective,
};
pub use version::{ReferenceKey, VersionChain, VersionMark, VersionedRecord, group};
