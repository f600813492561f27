//! Strongly-typed identifiers used across the ledger.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Offset that the legacy shared id column adds to delivery ids.
pub const LEGACY_DELIVERY_OFFSET: u64 = 1_000_000;

/// Offset that the legacy shared id column adds to sale ids.
pub const LEGACY_SALE_OFFSET: u64 = 2_000_000;

/// Which record stream an id belongs to.
///
/// Movements, deliveries and sales are produced by different subsystems, each
/// with its own id sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Movement,
    Delivery,
    Sale,
}

impl RecordKind {
    fn prefix(self) -> &'static str {
        match self {
            RecordKind::Movement => "MOV",
            RecordKind::Delivery => "DLV",
            RecordKind::Sale => "SAL",
        }
    }
}

/// Identifier of a stock record, tagged with the stream it came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub kind: RecordKind,
    pub id: u64,
}

impl RecordId {
    pub fn new(kind: RecordKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn movement(id: u64) -> Self {
        Self::new(RecordKind::Movement, id)
    }

    pub fn delivery(id: u64) -> Self {
        Self::new(RecordKind::Delivery, id)
    }

    pub fn sale(id: u64) -> Self {
        Self::new(RecordKind::Sale, id)
    }

    /// Decode an id from the legacy single-column encoding.
    ///
    /// Compatibility shim only: the band boundaries make any true movement id
    /// at or above 1,000,000 indistinguishable from a delivery.
    pub fn from_legacy(raw: u64) -> Self {
        if raw >= LEGACY_SALE_OFFSET {
            Self::sale(raw - LEGACY_SALE_OFFSET)
        } else if raw >= LEGACY_DELIVERY_OFFSET {
            Self::delivery(raw - LEGACY_DELIVERY_OFFSET)
        } else {
            Self::movement(raw)
        }
    }

    /// Encode into the legacy single-column form, refusing ids that would leak
    /// into another stream's band.
    pub fn to_legacy(self) -> Result<u64, LedgerError> {
        let band_overflow = || {
            LedgerError::validation_field(
                Some(self),
                "id",
                format!("{self} does not fit the legacy id encoding"),
            )
        };
        match self.kind {
            RecordKind::Movement if self.id < LEGACY_DELIVERY_OFFSET => Ok(self.id),
            RecordKind::Delivery if self.id < LEGACY_SALE_OFFSET - LEGACY_DELIVERY_OFFSET => {
                Ok(self.id + LEGACY_DELIVERY_OFFSET)
            }
            RecordKind::Sale => self.id.checked_add(LEGACY_SALE_OFFSET).ok_or_else(band_overflow),
            _ => Err(band_overflow()),
        }
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.kind.prefix(), self.id)
    }
}

impl FromStr for RecordId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::validation(format!("invalid record id '{s}'"));
        let (prefix, raw) = s.split_once('-').ok_or_else(invalid)?;
        let kind = match prefix {
            "MOV" => RecordKind::Movement,
            "DLV" => RecordKind::Delivery,
            "SAL" => RecordKind::Sale,
            _ => return Err(invalid()),
        };
        let id = raw.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(kind, id))
    }
}

/// Identifier of a product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u64);

/// Identifier of a product variation (size, colour, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariationId(pub u64);

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl core::fmt::Display for VariationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "V{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Warehouse,
    Branch,
}

/// A stock-holding location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationRef {
    pub kind: LocationKind,
    pub id: u64,
}

impl LocationRef {
    pub fn warehouse(id: u64) -> Self {
        Self { kind: LocationKind::Warehouse, id }
    }

    pub fn branch(id: u64) -> Self {
        Self { kind: LocationKind::Branch, id }
    }
}

impl core::fmt::Display for LocationRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind {
            LocationKind::Warehouse => write!(f, "warehouse:{}", self.id),
            LocationKind::Branch => write!(f, "branch:{}", self.id),
        }
    }
}
