use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{LocationRef, ProductId, RecordId, RecordKind, VariationId};

/// What kind of stock event a record describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryType {
    StockIn,
    Transfer,
    Return,
    Damage,
    Delivery,
    Sale,
    /// Anything the ledger does not recognise; skipped by aggregation.
    #[serde(other)]
    Unknown,
}

impl InventoryType {
    /// Types owned by the movement ledger (as opposed to the delivery/sale subsystems).
    pub fn is_ledger_movement(self) -> bool {
        matches!(
            self,
            InventoryType::StockIn | InventoryType::Transfer | InventoryType::Return | InventoryType::Damage
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InventoryType::StockIn => "STOCK_IN",
            InventoryType::Transfer => "TRANSFER",
            InventoryType::Return => "RETURN",
            InventoryType::Damage => "DAMAGE",
            InventoryType::Delivery => "DELIVERY",
            InventoryType::Sale => "SALE",
            InventoryType::Unknown => "UNKNOWN",
        }
    }
}

/// Directional effect of a record on a stock quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementAction {
    Add,
    Subtract,
    Reserve,
    Release,
    Deleted,
    Process,
    Invoiced,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    #[default]
    Pending,
    Confirmed,
}

/// One product line of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub variation_id: Option<VariationId>,
    pub quantity: u64,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
}

impl MovementItem {
    pub fn new(product_id: ProductId, variation_id: Option<VariationId>, quantity: u64) -> Self {
        Self {
            product_id,
            variation_id,
            quantity,
            product_name: None,
            sku: None,
            upc: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.product_name = Some(name.into());
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn line_key(&self) -> (ProductId, Option<VariationId>) {
        (self.product_id, self.variation_id)
    }
}

/// An atomic stock event, as stored by the persistence collaborator.
///
/// Ledger movements, delivery legs and sales all share this shape; `id.kind`
/// says which subsystem owns the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRecord {
    pub id: RecordId,
    pub inventory_type: InventoryType,
    pub action: MovementAction,
    pub items: Vec<MovementItem>,
    #[serde(default)]
    pub from_location: Option<LocationRef>,
    #[serde(default)]
    pub to_location: Option<LocationRef>,
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub reference_id: Option<u64>,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub invoiced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: LedgerStatus,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub processed_by: Option<String>,
    #[serde(default)]
    pub confirmed_by: Option<String>,
    /// Opaque free text. See [`crate::remarks`] for the legacy hint shim.
    #[serde(default)]
    pub remarks: Option<String>,
}

impl MovementRecord {
    pub fn new(id: RecordId, inventory_type: InventoryType, action: MovementAction) -> Self {
        Self {
            id,
            inventory_type,
            action,
            items: Vec::new(),
            from_location: None,
            to_location: None,
            reference_number: None,
            reference_id: None,
            transaction_date: None,
            created_at: None,
            verified_at: None,
            delivered_at: None,
            date: None,
            invoiced_at: None,
            confirmed_at: None,
            deleted_at: None,
            status: LedgerStatus::Pending,
            is_deleted: false,
            processed_by: None,
            confirmed_by: None,
            remarks: None,
        }
    }

    pub fn with_item(mut self, item: MovementItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn source(mut self, location: LocationRef) -> Self {
        self.from_location = Some(location);
        self
    }

    pub fn destination(mut self, location: LocationRef) -> Self {
        self.to_location = Some(location);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = Some(reference.into());
        self
    }

    pub fn at(mut self, transaction_date: DateTime<Utc>) -> Self {
        self.transaction_date = Some(transaction_date);
        self
    }

    pub fn confirmed(mut self, at: DateTime<Utc>) -> Self {
        self.status = LedgerStatus::Confirmed;
        self.confirmed_at = Some(at);
        self.verified_at = Some(at);
        self
    }

    /// Status as seen by the ledger. Delivery and sale records carry no stored
    /// status: their subsystems only emit them once they have happened.
    pub fn effective_status(&self) -> LedgerStatus {
        match self.inventory_type {
            InventoryType::Delivery | InventoryType::Sale => LedgerStatus::Confirmed,
            _ if self.id.kind != RecordKind::Movement => LedgerStatus::Confirmed,
            _ => self.status,
        }
    }

    /// Soft-deleted records are invisible to stock math.
    pub fn is_excluded(&self) -> bool {
        self.is_deleted || self.action == MovementAction::Deleted
    }

    /// The timestamp a record type logs its canonical time under.
    ///
    /// - SALE: `invoiced_at`, `created_at`, `transaction_date`
    /// - DELIVERY: `delivered_at`, `date`, `transaction_date`, `created_at`
    /// - everything else: `verified_at`, `transaction_date`, `created_at`
    pub fn effective_date(&self) -> Option<DateTime<Utc>> {
        match self.inventory_type {
            InventoryType::Sale => self.invoiced_at.or(self.created_at).or(self.transaction_date),
            InventoryType::Delivery => self
                .delivered_at
                .or(self.date)
                .or(self.transaction_date)
                .or(self.created_at),
            _ => self.verified_at.or(self.transaction_date).or(self.created_at),
        }
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn sale_prefers_invoice_time_over_creation() {
        let mut sale = MovementRecord::new(RecordId::sale(1), InventoryType::Sale, MovementAction::Subtract);
        sale.transaction_date = Some(ts(1));
        sale.created_at = Some(ts(2));
        assert_eq!(sale.effective_date(), Some(ts(2)));
        sale.invoiced_at = Some(ts(3));
        assert_eq!(sale.effective_date(), Some(ts(3)));
    }

    #[test]
    fn delivery_prefers_transaction_date_over_creation() {
        let mut delivery =
            MovementRecord::new(RecordId::delivery(1), InventoryType::Delivery, MovementAction::Add);
        delivery.created_at = Some(ts(1));
        delivery.transaction_date = Some(ts(4));
        assert_eq!(delivery.effective_date(), Some(ts(4)));
        delivery.date = Some(ts(5));
        assert_eq!(delivery.effective_date(), Some(ts(5)));
        delivery.delivered_at = Some(ts(6));
        assert_eq!(delivery.effective_date(), Some(ts(6)));
    }

    #[test]
    fn movements_prefer_verification_time() {
        let mut rec =
            MovementRecord::new(RecordId::movement(1), InventoryType::Transfer, MovementAction::Process);
        rec.created_at = Some(ts(1));
        assert_eq!(rec.effective_date(), Some(ts(1)));
        rec.transaction_date = Some(ts(2));
        rec.verified_at = Some(ts(3));
        assert_eq!(rec.effective_date(), Some(ts(3)));
    }

    #[test]
    fn external_records_are_always_effective() {
        let sale = MovementRecord::new(RecordId::sale(3), InventoryType::Sale, MovementAction::Subtract);
        assert_eq!(sale.effective_status(), LedgerStatus::Confirmed);
        let pending =
            MovementRecord::new(RecordId::movement(3), InventoryType::StockIn, MovementAction::Add);
        assert_eq!(pending.effective_status(), LedgerStatus::Pending);
    }

    #[test]
    fn unknown_enum_values_deserialize_without_error() {
        let json = serde_json::json!({
            "id": { "kind": "MOVEMENT", "id": 5 },
            "inventoryType": "RESTOCK_AUDIT",
            "action": "TELEPORT",
            "items": [{ "productId": 1, "quantity": 3 }]
        });
        let rec: MovementRecord = serde_json::from_value(json).unwrap();
        assert_eq!(rec.inventory_type, InventoryType::Unknown);
        assert_eq!(rec.action, MovementAction::Unknown);
        assert_eq!(rec.status, LedgerStatus::Pending);
        assert_eq!(rec.total_quantity(), 3);
    }
}
