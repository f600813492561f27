//! Version chains: every edit of a logical movement shares its reference key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::movement::MovementRecord;

/// Logical grouping key shared by all versions of the same movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceKey(String);

impl ReferenceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// `reference_number` when present, otherwise `REF-{reference_id or id}`.
    pub fn of(record: &MovementRecord) -> Self {
        match record.reference_number.as_deref().map(str::trim) {
            Some(reference) if !reference.is_empty() => Self(reference.to_string()),
            _ => Self(format!("REF-{}", record.reference_id.unwrap_or(record.id.id))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a record inside a chain with history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionMark {
    Latest { version_count: usize },
    Previous,
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub record: MovementRecord,
    /// `None` for single-version chains.
    pub mark: Option<VersionMark>,
}

impl VersionedRecord {
    pub fn is_latest_version(&self) -> bool {
        matches!(self.mark, Some(VersionMark::Latest { .. }))
    }

    pub fn has_history(&self) -> bool {
        self.is_latest_version()
    }

    pub fn version_count(&self) -> Option<usize> {
        match self.mark {
            Some(VersionMark::Latest { version_count }) => Some(version_count),
            _ => None,
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self.mark, Some(VersionMark::Original))
    }

    pub fn is_previous_version(&self) -> bool {
        matches!(self.mark, Some(VersionMark::Previous))
    }
}

/// Records sharing a reference key, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChain {
    pub key: ReferenceKey,
    pub entries: Vec<VersionedRecord>,
}

impl VersionChain {
    pub fn latest(&self) -> Option<&VersionedRecord> {
        self.entries.first()
    }

    pub fn original(&self) -> Option<&VersionedRecord> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_history(&self) -> bool {
        self.entries.len() > 1
    }
}

/// Group records into one chain per reference key.
///
/// Chains are ordered newest-first by effective date. The sort is stable, so
/// records with equal (or missing) dates keep their input order.
pub fn group(records: &[MovementRecord]) -> BTreeMap<ReferenceKey, VersionChain> {
    let mut buckets: BTreeMap<ReferenceKey, Vec<&MovementRecord>> = BTreeMap::new();
    for record in records {
        buckets.entry(ReferenceKey::of(record)).or_default().push(record);
    }

    buckets
        .into_iter()
        .map(|(key, mut members)| {
            // `Option` orders `None` first, so undated records end up at the tail.
            members.sort_by(|a, b| b.effective_date().cmp(&a.effective_date()));
            let chain = VersionChain {
                entries: mark_chain(&members),
                key: key.clone(),
            };
            (key, chain)
        })
        .collect()
}

fn mark_chain(members: &[&MovementRecord]) -> Vec<VersionedRecord> {
    let count = members.len();
    members
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let mark = if count < 2 {
                None
            } else if idx == 0 {
                Some(VersionMark::Latest { version_count: count })
            } else if idx == count - 1 {
                Some(VersionMark::Original)
            } else {
                Some(VersionMark::Previous)
            };
            VersionedRecord {
                record: (*record).clone(),
                mark,
            }
        })
        .collect()
}

/// Only the head of every chain, for list views that hide history.
pub fn latest_versions(records: &[MovementRecord]) -> Vec<VersionedRecord> {
    group(records)
        .into_values()
        .filter_map(|chain| chain.entries.into_iter().next())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{InventoryType, MovementAction};
    use chrono::{DateTime, TimeZone, Utc};
    use stockledger_core::RecordId;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap()
    }

    fn rec(id: u64, reference: Option<&str>, day: Option<u32>) -> MovementRecord {
        let mut r = MovementRecord::new(RecordId::movement(id), InventoryType::StockIn, MovementAction::Add);
        r.reference_number = reference.map(str::to_string);
        r.transaction_date = day.map(ts);
        r
    }

    #[test]
    fn three_edits_are_marked_original_previous_latest() {
        let records = vec![rec(2, Some("R-1"), Some(2)), rec(3, Some("R-1"), Some(3)), rec(1, Some("R-1"), Some(1))];
        let chains = group(&records);
        let chain = &chains[&ReferenceKey::new("R-1")];

        let ids: Vec<u64> = chain.entries.iter().map(|e| e.record.id.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert!(chain.entries[0].is_latest_version());
        assert!(chain.entries[0].has_history());
        assert_eq!(chain.entries[0].version_count(), Some(3));
        assert!(chain.entries[1].is_previous_version());
        assert!(chain.entries[2].is_original());
    }

    #[test]
    fn single_record_chain_has_no_markers() {
        let chains = group(&[rec(7, Some("R-7"), Some(1))]);
        let entry = &chains[&ReferenceKey::new("R-7")].entries[0];
        assert_eq!(entry.mark, None);
        assert!(!entry.is_latest_version());
        assert!(!entry.is_original());
        assert!(!entry.has_history());
    }

    #[test]
    fn equal_dates_keep_input_order() {
        let records = vec![rec(10, Some("R"), Some(4)), rec(11, Some("R"), Some(4)), rec(12, Some("R"), Some(4))];
        let chain = &group(&records)[&ReferenceKey::new("R")];
        let ids: Vec<u64> = chain.entries.iter().map(|e| e.record.id.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn missing_reference_is_synthesized() {
        let mut with_ref_id = rec(5, None, Some(1));
        with_ref_id.reference_id = Some(77);
        let chains = group(&[rec(4, None, Some(1)), with_ref_id, rec(6, Some("  "), None)]);
        assert!(chains.contains_key(&ReferenceKey::new("REF-4")));
        assert!(chains.contains_key(&ReferenceKey::new("REF-77")));
        assert!(chains.contains_key(&ReferenceKey::new("REF-6")));
    }

    #[test]
    fn effective_date_precedence_drives_ordering() {
        // The sale's invoice time is newer than the other record's transaction date,
        // even though its own transaction date is older.
        let mut sale = MovementRecord::new(RecordId::sale(1), InventoryType::Sale, MovementAction::Subtract);
        sale.reference_number = Some("X".into());
        sale.transaction_date = Some(ts(1));
        sale.invoiced_at = Some(ts(9));
        let older = rec(2, Some("X"), Some(5));

        let chain = &group(&[older, sale])[&ReferenceKey::new("X")];
        assert_eq!(chain.latest().unwrap().record.id, RecordId::sale(1));
        assert_eq!(chain.original().unwrap().record.id, RecordId::movement(2));
    }

    #[test]
    fn latest_versions_returns_chain_heads() {
        let records = vec![rec(1, Some("A"), Some(1)), rec(2, Some("A"), Some(2)), rec(3, Some("B"), Some(1))];
        let heads: Vec<u64> = latest_versions(&records).iter().map(|v| v.record.id.id).collect();
        assert_eq!(heads, vec![2, 3]);
    }
}
