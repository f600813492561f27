//! Filter/query layer for list and report views.
//!
//! All active filters are combined with AND; an unset filter is a no-op.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockledger_core::{LocationKind, LocationRef, ProductId, VariationId};

use crate::classify::{Direction, direction_of};
use crate::movement::{InventoryType, LedgerStatus, MovementRecord};
use crate::stock::StockSnapshot;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Confirmed,
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementQuery {
    /// Case-insensitive substring over product name, SKU, UPC, remarks and reference.
    pub text: Option<String>,
    pub status: StatusFilter,
    pub inventory_type: Option<InventoryType>,
    pub direction: Option<Direction>,
    pub min_quantity: Option<u64>,
    pub max_quantity: Option<u64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    /// Inclusive.
    pub date_from: Option<NaiveDate>,
    /// Inclusive through the end of the day.
    pub date_to: Option<NaiveDate>,
}

impl MovementQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn inventory_type(mut self, inventory_type: InventoryType) -> Self {
        self.inventory_type = Some(inventory_type);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn quantity_between(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_quantity = min;
        self.max_quantity = max;
        self
    }

    pub fn items_between(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_items = min;
        self.max_items = max;
        self
    }

    pub fn dated_between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn matches(&self, record: &MovementRecord) -> bool {
        self.matches_status(record)
            && self.inventory_type.is_none_or(|t| record.inventory_type == t)
            && self.direction.is_none_or(|d| direction_of(record) == d)
            && self.matches_ranges(record)
            && self.matches_dates(record)
            && self.matches_text(record)
    }

    fn matches_status(&self, record: &MovementRecord) -> bool {
        let deleted = record.is_excluded();
        match self.status {
            StatusFilter::All => true,
            StatusFilter::Deleted => deleted,
            StatusFilter::Pending => !deleted && record.effective_status() == LedgerStatus::Pending,
            StatusFilter::Confirmed => !deleted && record.effective_status() == LedgerStatus::Confirmed,
        }
    }

    fn matches_ranges(&self, record: &MovementRecord) -> bool {
        let quantity = record.total_quantity();
        let lines = record.items.len();
        self.min_quantity.is_none_or(|min| quantity >= min)
            && self.max_quantity.is_none_or(|max| quantity <= max)
            && self.min_items.is_none_or(|min| lines >= min)
            && self.max_items.is_none_or(|max| lines <= max)
    }

    fn matches_dates(&self, record: &MovementRecord) -> bool {
        if self.date_from.is_none() && self.date_to.is_none() {
            return true;
        }
        let Some(day) = record.effective_date().map(|d| d.date_naive()) else {
            return false;
        };
        self.date_from.is_none_or(|from| day >= from) && self.date_to.is_none_or(|to| day <= to)
    }

    fn matches_text(&self, record: &MovementRecord) -> bool {
        let Some(needle) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return true;
        };
        let needle = needle.to_lowercase();
        let hit = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(&needle));

        hit(record.reference_number.as_deref())
            || hit(record.remarks.as_deref())
            || record.items.iter().any(|item| {
                hit(item.product_name.as_deref()) || hit(item.sku.as_deref()) || hit(item.upc.as_deref())
            })
    }

    /// Filter and sort for display.
    pub fn run<'a>(&self, records: &'a [MovementRecord]) -> Vec<&'a MovementRecord> {
        let mut hits: Vec<&MovementRecord> = records.iter().filter(|r| self.matches(r)).collect();
        hits.sort_by(|a, b| display_order(a, b));
        hits
    }
}

/// Deleted records last, then newest effective date first. Stable for ties.
pub fn display_order(a: &MovementRecord, b: &MovementRecord) -> Ordering {
    a.is_excluded()
        .cmp(&b.is_excluded())
        .then_with(|| b.effective_date().cmp(&a.effective_date()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    pub location_kind: Option<LocationKind>,
    pub location: Option<LocationRef>,
    pub product_id: Option<ProductId>,
    pub variation_id: Option<VariationId>,
    pub min_available: Option<u64>,
    /// Low-stock threshold: only snapshots at or below this availability.
    pub max_available: Option<u64>,
    pub in_stock_only: bool,
}

impl SnapshotQuery {
    pub fn matches(&self, snapshot: &StockSnapshot) -> bool {
        let key = &snapshot.key;
        self.location_kind.is_none_or(|k| key.location.kind == k)
            && self.location.is_none_or(|l| key.location == l)
            && self.product_id.is_none_or(|p| key.product_id == p)
            && self.variation_id.is_none_or(|v| key.variation_id == Some(v))
            && self.min_available.is_none_or(|min| snapshot.available_quantity >= min)
            && self.max_available.is_none_or(|max| snapshot.available_quantity <= max)
            && (!self.in_stock_only || snapshot.quantity > 0)
    }

    /// Matching snapshots ordered by key.
    pub fn run<'a>(&self, snapshots: &'a [StockSnapshot]) -> Vec<&'a StockSnapshot> {
        let mut hits: Vec<&StockSnapshot> = snapshots.iter().filter(|s| self.matches(s)).collect();
        hits.sort_by_key(|s| s.key);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{MovementAction, MovementItem};
    use crate::stock::StockKey;
    use chrono::{DateTime, TimeZone, Utc};
    use stockledger_core::RecordId;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, day, hour, 59, 59).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, d).unwrap()
    }

    fn records() -> Vec<MovementRecord> {
        let soap = MovementItem::new(ProductId(1), None, 10).named("Olive Soap").with_sku("SOAP-01");
        let mut upc_item = MovementItem::new(ProductId(2), None, 4);
        upc_item.upc = Some("0123456789".into());

        vec![
            MovementRecord::new(RecordId::movement(1), InventoryType::StockIn, MovementAction::Add)
                .with_item(soap.clone())
                .destination(LocationRef::warehouse(1))
                .reference("PO-77")
                .at(at(1, 8))
                .confirmed(at(1, 9)),
            MovementRecord::new(RecordId::movement(2), InventoryType::Transfer, MovementAction::Process)
                .with_item(soap)
                .with_item(upc_item)
                .source(LocationRef::warehouse(1))
                .destination(LocationRef::branch(2))
                .reference("TR-1")
                .at(at(3, 23)),
            {
                let mut deleted =
                    MovementRecord::new(RecordId::movement(3), InventoryType::Damage, MovementAction::Subtract)
                        .with_item(MovementItem::new(ProductId(3), None, 1))
                        .destination(LocationRef::warehouse(1))
                        .reference("DMG-1")
                        .at(at(5, 8));
                deleted.is_deleted = true;
                deleted.remarks = Some("Broken in transit".into());
                deleted
            },
        ]
    }

    fn ids(hits: Vec<&MovementRecord>) -> Vec<u64> {
        hits.into_iter().map(|r| r.id.id).collect()
    }

    #[test]
    fn empty_query_returns_everything_deleted_last() {
        assert_eq!(ids(MovementQuery::new().run(&records())), vec![2, 1, 3]);
    }

    #[test]
    fn text_search_spans_names_codes_remarks_and_reference() {
        let data = records();
        assert_eq!(ids(MovementQuery::new().text("olive").run(&data)), vec![2, 1]);
        assert_eq!(ids(MovementQuery::new().text("soap-01").run(&data)), vec![2, 1]);
        assert_eq!(ids(MovementQuery::new().text("456").run(&data)), vec![2]);
        assert_eq!(ids(MovementQuery::new().text("TRANSIT").run(&data)), vec![3]);
        assert_eq!(ids(MovementQuery::new().text("po-7").run(&data)), vec![1]);
        assert_eq!(ids(MovementQuery::new().text("   ").run(&data)).len(), 3);
    }

    #[test]
    fn categorical_filters_combine_with_and() {
        let data = records();
        assert_eq!(ids(MovementQuery::new().status(StatusFilter::Pending).run(&data)), vec![2]);
        assert_eq!(ids(MovementQuery::new().status(StatusFilter::Confirmed).run(&data)), vec![1]);
        assert_eq!(ids(MovementQuery::new().status(StatusFilter::Deleted).run(&data)), vec![3]);
        assert_eq!(
            ids(MovementQuery::new().direction(Direction::Transfer).text("soap").run(&data)),
            vec![2]
        );
        assert!(
            MovementQuery::new()
                .inventory_type(InventoryType::StockIn)
                .status(StatusFilter::Pending)
                .run(&data)
                .is_empty()
        );
    }

    #[test]
    fn numeric_ranges_use_totals_and_line_counts() {
        let data = records();
        assert_eq!(ids(MovementQuery::new().quantity_between(Some(11), None).run(&data)), vec![2]);
        assert_eq!(ids(MovementQuery::new().quantity_between(None, Some(10)).run(&data)), vec![1, 3]);
        assert_eq!(ids(MovementQuery::new().items_between(Some(2), Some(2)).run(&data)), vec![2]);
    }

    #[test]
    fn date_range_includes_whole_end_day() {
        let data = records();
        // Record 2 is at 23:59:59 on the 3rd and must be included.
        assert_eq!(ids(MovementQuery::new().dated_between(Some(day(2)), Some(day(3))).run(&data)), vec![2]);
        assert_eq!(ids(MovementQuery::new().dated_between(Some(day(1)), Some(day(1))).run(&data)), vec![1]);
        assert_eq!(ids(MovementQuery::new().dated_between(Some(day(4)), None).run(&data)), vec![3]);
    }

    #[test]
    fn snapshot_query_finds_low_stock() {
        let mut low = StockSnapshot::empty(StockKey::new(LocationRef::branch(2), ProductId(1), None));
        low.quantity = 3;
        low.available_quantity = 3;
        let mut high = StockSnapshot::empty(StockKey::new(LocationRef::warehouse(1), ProductId(1), None));
        high.quantity = 90;
        high.available_quantity = 90;
        let empty = StockSnapshot::empty(StockKey::new(LocationRef::warehouse(1), ProductId(2), None));
        let snapshots = vec![low.clone(), high.clone(), empty];

        let query = SnapshotQuery {
            max_available: Some(5),
            in_stock_only: true,
            ..SnapshotQuery::default()
        };
        assert_eq!(query.run(&snapshots), vec![&low]);

        let warehouses = SnapshotQuery {
            location_kind: Some(LocationKind::Warehouse),
            product_id: Some(ProductId(1)),
            ..SnapshotQuery::default()
        };
        assert_eq!(warehouses.run(&snapshots), vec![&high]);
    }
}
