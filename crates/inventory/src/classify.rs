//! Movement classification: raw record → semantic type, direction, display category.
//!
//! Everything here is a pure function of the record and is recomputed on
//! every read; nothing is stored.

use serde::{Deserialize, Serialize};

use crate::movement::{InventoryType, MovementAction, MovementRecord};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    StockIn,
    /// Transfer with only a destination.
    TransferIn,
    /// Transfer with only a source.
    TransferOut,
    /// Transfer with both legs.
    Transfer,
    Return,
    Damage,
    /// Warehouse leg of a delivery.
    DeliveryOut,
    /// Branch leg of a delivery.
    DeliveryIn,
    Sale,
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorCategory {
    Green,
    Blue,
    Orange,
    Purple,
    Teal,
    Red,
    Indigo,
    Gray,
}

impl ColorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorCategory::Green => "green",
            ColorCategory::Blue => "blue",
            ColorCategory::Orange => "orange",
            ColorCategory::Purple => "purple",
            ColorCategory::Teal => "teal",
            ColorCategory::Red => "red",
            ColorCategory::Indigo => "indigo",
            ColorCategory::Gray => "gray",
        }
    }
}

/// How a quantity is displayed next to a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantitySign {
    Plus,
    Minus,
    Pending,
    Reversal,
    Neutral,
}

impl QuantitySign {
    pub fn marker(self) -> &'static str {
        match self {
            QuantitySign::Plus => "+",
            QuantitySign::Minus => "-",
            QuantitySign::Pending => "~",
            QuantitySign::Reversal => "<>",
            QuantitySign::Neutral => "±",
        }
    }

    /// Render a quantity with its marker, e.g. `+40` or `±3`.
    pub fn render(self, quantity: u64) -> String {
        format!("{}{}", self.marker(), quantity)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub inventory_type: InventoryType,
    pub direction: Direction,
    pub color: ColorCategory,
    pub sign: QuantitySign,
}

pub fn classify(record: &MovementRecord) -> Classification {
    let direction = direction_of(record);
    Classification {
        inventory_type: record.inventory_type,
        direction,
        color: color_of(record.inventory_type, direction),
        sign: sign_of(record.action, direction),
    }
}

pub fn direction_of(record: &MovementRecord) -> Direction {
    let has_from = record.from_location.is_some();
    let has_to = record.to_location.is_some();

    match record.inventory_type {
        InventoryType::StockIn => Direction::StockIn,
        InventoryType::Transfer => match (has_from, has_to) {
            (true, true) => Direction::Transfer,
            (false, true) => Direction::TransferIn,
            (true, false) => Direction::TransferOut,
            (false, false) => Direction::Unknown,
        },
        InventoryType::Return => Direction::Return,
        InventoryType::Damage => Direction::Damage,
        InventoryType::Delivery => match record.action {
            MovementAction::Add => Direction::DeliveryIn,
            _ => Direction::DeliveryOut,
        },
        InventoryType::Sale => Direction::Sale,
        InventoryType::Unknown => Direction::Unknown,
    }
}

/// Lookup table keyed by (type, direction).
pub fn color_of(inventory_type: InventoryType, direction: Direction) -> ColorCategory {
    match (inventory_type, direction) {
        (_, Direction::Unknown) => ColorCategory::Gray,
        (InventoryType::StockIn, _) => ColorCategory::Green,
        (InventoryType::Transfer, Direction::TransferIn) => ColorCategory::Blue,
        (InventoryType::Transfer, Direction::TransferOut) => ColorCategory::Orange,
        (InventoryType::Transfer, _) => ColorCategory::Purple,
        (InventoryType::Return, _) => ColorCategory::Teal,
        (InventoryType::Damage, _) => ColorCategory::Red,
        (InventoryType::Delivery, Direction::DeliveryIn) => ColorCategory::Blue,
        (InventoryType::Delivery, _) => ColorCategory::Orange,
        (InventoryType::Sale, _) => ColorCategory::Indigo,
        (InventoryType::Unknown, _) => ColorCategory::Gray,
    }
}

/// Display sign: the action decides when it is directional, otherwise the
/// direction does. Unknown actions are neutral.
pub fn sign_of(action: MovementAction, direction: Direction) -> QuantitySign {
    match action {
        MovementAction::Add => QuantitySign::Plus,
        MovementAction::Subtract => QuantitySign::Minus,
        MovementAction::Reserve => QuantitySign::Pending,
        MovementAction::Release => QuantitySign::Reversal,
        MovementAction::Unknown => QuantitySign::Neutral,
        MovementAction::Deleted | MovementAction::Process | MovementAction::Invoiced => match direction {
            Direction::StockIn | Direction::Return | Direction::TransferIn | Direction::DeliveryIn => {
                QuantitySign::Plus
            }
            Direction::Damage | Direction::Sale | Direction::TransferOut | Direction::DeliveryOut => {
                QuantitySign::Minus
            }
            Direction::Transfer | Direction::Unknown => QuantitySign::Neutral,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{LocationRef, RecordId};

    fn transfer(from: Option<LocationRef>, to: Option<LocationRef>) -> MovementRecord {
        let mut rec = MovementRecord::new(RecordId::movement(1), InventoryType::Transfer, MovementAction::Process);
        rec.from_location = from;
        rec.to_location = to;
        rec
    }

    #[test]
    fn transfer_direction_follows_present_legs() {
        let w = LocationRef::warehouse(1);
        let b = LocationRef::branch(2);
        assert_eq!(direction_of(&transfer(None, Some(b))), Direction::TransferIn);
        assert_eq!(direction_of(&transfer(Some(w), None)), Direction::TransferOut);
        assert_eq!(direction_of(&transfer(Some(w), Some(b))), Direction::Transfer);
        assert_eq!(direction_of(&transfer(None, None)), Direction::Unknown);
    }

    #[test]
    fn direction_is_recomputed_after_location_change() {
        let mut rec = transfer(Some(LocationRef::warehouse(1)), None);
        assert_eq!(classify(&rec).direction, Direction::TransferOut);
        rec.to_location = Some(LocationRef::branch(5));
        assert_eq!(classify(&rec).direction, Direction::Transfer);
        assert_eq!(classify(&rec).color, ColorCategory::Purple);
    }

    #[test]
    fn delivery_legs_are_told_apart_by_action() {
        let out = MovementRecord::new(RecordId::delivery(1), InventoryType::Delivery, MovementAction::Subtract);
        let inbound = MovementRecord::new(RecordId::delivery(1), InventoryType::Delivery, MovementAction::Add);
        assert_eq!(classify(&out).direction, Direction::DeliveryOut);
        assert_eq!(classify(&out).sign, QuantitySign::Minus);
        assert_eq!(classify(&inbound).direction, Direction::DeliveryIn);
        assert_eq!(classify(&inbound).sign, QuantitySign::Plus);
    }

    #[test]
    fn signs_follow_action_then_type() {
        assert_eq!(sign_of(MovementAction::Reserve, Direction::Sale), QuantitySign::Pending);
        assert_eq!(sign_of(MovementAction::Release, Direction::Sale), QuantitySign::Reversal);
        assert_eq!(sign_of(MovementAction::Invoiced, Direction::Sale), QuantitySign::Minus);
        assert_eq!(sign_of(MovementAction::Process, Direction::StockIn), QuantitySign::Plus);
        assert_eq!(sign_of(MovementAction::Process, Direction::Damage), QuantitySign::Minus);
        assert_eq!(sign_of(MovementAction::Unknown, Direction::StockIn), QuantitySign::Neutral);
        assert_eq!(QuantitySign::Neutral.render(3), "±3");
    }

    #[test]
    fn classification_is_stable() {
        let rec = transfer(Some(LocationRef::warehouse(1)), Some(LocationRef::branch(1)));
        assert_eq!(classify(&rec), classify(&rec.clone()));
    }

    #[test]
    fn unknown_type_falls_back_to_gray() {
        let rec = MovementRecord::new(RecordId::movement(9), InventoryType::Unknown, MovementAction::Unknown);
        let c = classify(&rec);
        assert_eq!(c.direction, Direction::Unknown);
        assert_eq!(c.color, ColorCategory::Gray);
        assert_eq!(c.sign, QuantitySign::Neutral);
    }
}
