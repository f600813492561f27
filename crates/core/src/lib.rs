//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger crates:
//! typed identifiers, the ledger error taxonomy and aggregate traits.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{LedgerError, LedgerResult};
pub use id::{LocationKind, LocationRef, ProductId, RecordId, RecordKind, VariationId};
