//! Transactional ledger operations.
//!
//! `LedgerService` composes a [`MovementStore`], an [`EventBus`] and the
//! per-key lock table:
//!
//! ```text
//! load record -> Movement::handle (pure guards) -> lock stock keys
//!   -> read snapshots -> apply effects (checked) -> commit (versions + dedupe)
//!   -> publish notice to the acting session
//! ```
//!
//! A commit that loses an optimistic check is retried from the top, up to
//! `LedgerConfig::commit_retries` times. Notices are published only after a
//! successful commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_auth::{Actor, Permission, authorize};
use stockledger_core::{
    Aggregate, AggregateRoot, ExpectedVersion, LedgerError, LedgerResult, RecordId, RecordKind,
};
use stockledger_events::{Event, EventBus, EventEnvelope, SessionId};
use stockledger_inventory::stock::{Change, StockField};
use stockledger_inventory::{
    AggregationReport, Anomaly, Classification, ConfirmMovement, CreateMovement, DeleteMovement,
    EditMovement, InventoryType, LedgerStatus, Movement, MovementCommand, MovementEvent,
    MovementPatch, MovementQuery, MovementRecord, NewMovement, ReferenceKey, SnapshotQuery,
    StockBook, StockEffect, StockKey, StockSnapshot, VersionChain, aggregate_with_report, classify,
    effects_of, group, is_effective,
};

use crate::config::LedgerConfig;
use crate::locks::KeyedLocks;
use crate::store::{LedgerWrite, MovementFilter, MovementStore};

/// Who is acting, from which session, at what business time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerContext {
    pub session_id: SessionId,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

impl LedgerContext {
    pub fn new(session_id: SessionId, actor: Actor, at: DateTime<Utc>) -> Self {
        Self { session_id, actor, at }
    }
}

/// An external delivery/sale record was accepted and its stock effect applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIngested {
    pub id: RecordId,
    pub inventory_type: InventoryType,
    /// Number of clamped decreases.
    pub anomalies: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Everything the ledger announces on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    Movement(MovementEvent),
    ExternalIngested(ExternalIngested),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::Movement(e) => e.event_type(),
            LedgerEvent::ExternalIngested(_) => "inventory.external.ingested",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::Movement(e) => e.occurred_at(),
            LedgerEvent::ExternalIngested(e) => e.occurred_at,
        }
    }
}

/// Session-scoped notice published after every committed transition.
pub type LedgerNotice = EventEnvelope<LedgerEvent>;

#[derive(Debug)]
pub struct LedgerService<S, B> {
    store: S,
    bus: B,
    locks: KeyedLocks,
    config: LedgerConfig,
    sequence: AtomicU64,
}

impl<S, B> LedgerService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self::with_config(store, bus, LedgerConfig::default())
    }

    pub fn with_config(store: S, bus: B, config: LedgerConfig) -> Self {
        Self {
            store,
            bus,
            locks: KeyedLocks::new(),
            config,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}

impl<S, B> LedgerService<S, B>
where
    S: MovementStore,
    B: EventBus<LedgerNotice>,
{
    /// Record a new PENDING movement.
    pub fn create(&self, ctx: &LedgerContext, movement: NewMovement) -> LedgerResult<MovementRecord> {
        let id = self.store.next_id(RecordKind::Movement)?;
        let command = MovementCommand::Create(CreateMovement {
            id,
            movement,
            actor: ctx.actor.clone(),
            occurred_at: ctx.at,
        });
        let (created, events) = decide(Movement::empty(id), &command)?;
        let record = record_of(created)?;

        self.store
            .commit(LedgerWrite::new().movement(record.clone(), ExpectedVersion::Absent))?;

        tracing::info!(
            record = %id,
            inventory_type = record.inventory_type.as_str(),
            items = record.items.len(),
            actor = %ctx.actor.name,
            "movement created"
        );
        self.publish(ctx, events);
        Ok(record)
    }

    /// Replace a PENDING movement with a new version; returns the replacement.
    ///
    /// The old record is soft-deleted and keeps its reference number, so it
    /// shows up as a previous version of the new one.
    pub fn edit(&self, ctx: &LedgerContext, id: RecordId, patch: MovementPatch) -> LedgerResult<MovementRecord> {
        let (replacement, events) = self.with_retries("edit", id, || {
            let (current, version) = self.load(id)?;
            // Ids burned by rejected edits leave gaps in the sequence.
            let replacement_id = self.store.next_id(RecordKind::Movement)?;
            let command = MovementCommand::Edit(EditMovement {
                replacement_id,
                patch: patch.clone(),
                actor: ctx.actor.clone(),
                occurred_at: ctx.at,
            });
            let (superseded, events) = decide(current, &command)?;
            let replacement = events
                .iter()
                .find_map(|e| match e {
                    MovementEvent::Superseded(s) => Some(s.replacement.clone()),
                    _ => None,
                })
                .ok_or(LedgerError::NotFound(replacement_id))?;

            self.store.commit(
                LedgerWrite::new()
                    .movement(record_of(superseded)?, ExpectedVersion::Exact(version))
                    .movement(replacement.clone(), ExpectedVersion::Absent),
            )?;
            Ok((replacement, events))
        })?;

        tracing::info!(record = %id, replacement = %replacement.id, actor = %ctx.actor.name, "movement edited");
        self.publish(ctx, events);
        Ok(replacement)
    }

    /// PENDING -> CONFIRMED, applying the stock effect atomically.
    ///
    /// Every draw is checked against current availability first; any shortfall
    /// fails the whole confirmation and leaves stock and status untouched.
    /// With a `dedupe_key`, a retry after a committed attempt returns the
    /// confirmed record instead of failing.
    pub fn confirm(&self, ctx: &LedgerContext, id: RecordId, dedupe_key: Option<Uuid>) -> LedgerResult<MovementRecord> {
        let (record, events) = self.with_retries("confirm", id, || self.try_confirm(ctx, id, dedupe_key))?;

        if !events.is_empty() {
            tracing::info!(record = %id, actor = %ctx.actor.name, "movement confirmed");
        }
        self.publish(ctx, events);
        Ok(record)
    }

    fn try_confirm(
        &self,
        ctx: &LedgerContext,
        id: RecordId,
        dedupe_key: Option<Uuid>,
    ) -> LedgerResult<(MovementRecord, Vec<MovementEvent>)> {
        let (movement, version) = self.load(id)?;

        if let Some(key) = dedupe_key {
            if let Some(done) = self.store.dedupe_record(key)? {
                if done != id {
                    return Err(LedgerError::validation_field(
                        Some(id),
                        "dedupe_key",
                        format!("dedupe key {key} was already used for {done}"),
                    ));
                }
                tracing::info!(record = %id, dedupe_key = %key, "confirmation already committed");
                return Ok((record_of(movement)?, Vec::new()));
            }
        }

        let command = MovementCommand::Confirm(ConfirmMovement {
            actor: ctx.actor.clone(),
            occurred_at: ctx.at,
        });
        let events = movement.handle(&command)?;
        let effects = effects_for(current_record(&movement)?)?;

        let keys = keys_of(&effects);
        let _guard = self.locks.lock_all(&keys, self.config.lock_timeout)?;
        let (mut book, expected) = self.load_book(&keys)?;
        if let Err(err) = book.apply_checked(id, &effects, Some(ctx.at)) {
            tracing::warn!(record = %id, error = %err, "confirmation rejected");
            return Err(err);
        }

        let confirmed = record_of(apply_all(movement, &events))?;
        let write = stock_write(
            LedgerWrite::new().movement(confirmed.clone(), ExpectedVersion::Exact(version)),
            &book,
            &expected,
        )
        .dedupe(dedupe_key);
        self.store.commit(write)?;

        Ok((confirmed, events))
    }

    /// Soft-delete a movement.
    ///
    /// PENDING records go unconditionally. CONFIRMED records need the
    /// elevated permission and a passing [`LedgerService::can_modify`]; their
    /// stock effect is reversed in the same commit.
    pub fn delete(&self, ctx: &LedgerContext, id: RecordId) -> LedgerResult<MovementRecord> {
        let (record, events) = self.with_retries("delete", id, || self.try_delete(ctx, id))?;

        tracing::info!(record = %id, actor = %ctx.actor.name, "movement deleted");
        self.publish(ctx, events);
        Ok(record)
    }

    fn try_delete(&self, ctx: &LedgerContext, id: RecordId) -> LedgerResult<(MovementRecord, Vec<MovementEvent>)> {
        let (movement, version) = self.load(id)?;
        let command = MovementCommand::Delete(DeleteMovement {
            actor: ctx.actor.clone(),
            occurred_at: ctx.at,
        });
        let events = movement.handle(&command)?;
        let reverses_stock = events
            .iter()
            .any(|e| matches!(e, MovementEvent::Deleted(d) if d.reverses_stock));
        let original = current_record(&movement)?.clone();
        let deleted = record_of(apply_all(movement, &events))?;
        let write = LedgerWrite::new().movement(deleted.clone(), ExpectedVersion::Exact(version));

        if !reverses_stock {
            self.store.commit(write)?;
            return Ok((deleted, events));
        }

        self.ensure_unconsumed(&original)?;
        let reversal: Vec<StockEffect> = effects_for(&original)?.iter().rev().map(StockEffect::inverse).collect();

        let keys = keys_of(&reversal);
        let _guard = self.locks.lock_all(&keys, self.config.lock_timeout)?;
        let (mut book, expected) = self.load_book(&keys)?;
        book.apply_checked(id, &reversal, Some(ctx.at)).map_err(already_consumed)?;

        self.store.commit(stock_write(write, &book, &expected))?;
        tracing::debug!(record = %id, keys = keys.len(), "stock effect reversed");
        Ok((deleted, events))
    }

    /// Whether a movement may still be deleted without corrupting downstream stock.
    ///
    /// Pending records always may. A confirmed record may not once a delivery
    /// or sale dated at or after its confirmation drew from a location it
    /// stocked.
    pub fn can_modify(&self, id: RecordId) -> LedgerResult<()> {
        let (movement, _) = self.load(id)?;
        let record = current_record(&movement)?;
        if record.effective_status() == LedgerStatus::Confirmed {
            self.ensure_unconsumed(record)?;
        }
        Ok(())
    }

    fn ensure_unconsumed(&self, record: &MovementRecord) -> LedgerResult<()> {
        let stocked: BTreeSet<StockKey> = effects_for(record)?
            .iter()
            .filter(|e| e.field == StockField::Quantity && e.change == Change::Increase)
            .map(|e| e.key)
            .collect();
        if stocked.is_empty() {
            return Ok(());
        }

        let downstream = self.store.list_movements(
            &MovementFilter::new()
                .kind(RecordKind::Delivery)
                .kind(RecordKind::Sale),
        )?;
        for other in downstream.iter().filter(|r| is_effective(r)) {
            let after_confirmation = match (record.confirmed_at, other.effective_date()) {
                (Some(confirmed_at), Some(at)) => at >= confirmed_at,
                _ => true,
            };
            if !after_confirmation {
                continue;
            }
            let Ok(effects) = effects_of(other) else {
                continue;
            };
            if let Some(hit) = effects.iter().find(|e| e.draws_available() && stocked.contains(&e.key)) {
                tracing::warn!(record = %record.id, consumed_by = %other.id, key = %hit.key, "confirmed stock already consumed");
                return Err(LedgerError::StockAlreadyConsumed {
                    record: record.id,
                    location: hit.key.location,
                    product: hit.key.product_id,
                    consumed_by: Some(other.id),
                    reason: format!("{} drew from it after confirmation", other.id),
                });
            }
        }
        Ok(())
    }

    /// Accept a delivery or sale record from its own subsystem.
    ///
    /// Re-ingesting an id replaces the earlier version: its effect is undone
    /// and the new one applied. Decreases clamp at zero and come back as
    /// anomalies instead of failing, since the external system already acted.
    pub fn ingest_external(&self, ctx: &LedgerContext, record: MovementRecord) -> LedgerResult<Vec<Anomaly>> {
        authorize(&ctx.actor, &Permission::STOCK_INGEST)?;
        let id = record.id;
        let expected_type = match id.kind {
            RecordKind::Delivery => InventoryType::Delivery,
            RecordKind::Sale => InventoryType::Sale,
            RecordKind::Movement => {
                return Err(LedgerError::validation_field(
                    Some(id),
                    "id",
                    "movement ids belong to the ledger; use create()",
                ));
            }
        };
        if record.inventory_type != expected_type {
            return Err(LedgerError::validation_field(
                Some(id),
                "inventory_type",
                format!("{id} cannot carry a {} record", record.inventory_type.as_str()),
            ));
        }
        let incoming = if is_effective(&record) {
            effects_for(&record)?
        } else {
            Vec::new()
        };

        let anomalies = self.with_retries("ingest", id, || {
            let previous = self.store.get_movement(id)?;
            let mut effects: Vec<StockEffect> = previous
                .as_ref()
                .filter(|p| is_effective(&p.record))
                .and_then(|p| effects_of(&p.record).ok())
                .map(|old| old.iter().rev().map(StockEffect::inverse).collect())
                .unwrap_or_default();
            effects.extend(incoming.iter().copied());
            let expected_record = previous
                .as_ref()
                .map_or(ExpectedVersion::Absent, |p| ExpectedVersion::Exact(p.version));

            let keys = keys_of(&effects);
            let _guard = self.locks.lock_all(&keys, self.config.lock_timeout)?;
            let (mut book, expected) = self.load_book(&keys)?;
            let (_, anomalies) = book.apply_clamped(id, &effects, Some(ctx.at));

            self.store.commit(stock_write(
                LedgerWrite::new().movement(record.clone(), expected_record),
                &book,
                &expected,
            ))?;
            Ok(anomalies)
        })?;

        tracing::info!(
            record = %id,
            inventory_type = record.inventory_type.as_str(),
            anomalies = anomalies.len(),
            "external record ingested"
        );
        self.publish_one(
            ctx,
            id,
            LedgerEvent::ExternalIngested(ExternalIngested {
                id,
                inventory_type: record.inventory_type,
                anomalies: anomalies.len(),
                occurred_at: ctx.at,
            }),
        );
        Ok(anomalies)
    }

    /// Re-aggregate every stored record and swap in the result.
    ///
    /// The swap fails (and is retried) if any snapshot changed while the
    /// records were being replayed.
    pub fn rebuild_snapshots(&self, ctx: &LedgerContext) -> LedgerResult<AggregationReport> {
        authorize(&ctx.actor, &Permission::STOCK_INGEST)?;

        let report = self.with_retries("rebuild", "snapshots", || {
            let stored: BTreeMap<StockKey, u64> = self
                .store
                .list_snapshots()?
                .into_iter()
                .map(|s| (s.key, s.version))
                .collect();
            let records = self.store.list_movements(&MovementFilter::everything())?;
            let mut report = aggregate_with_report(&records);
            // Versions only move forward so stale writers still conflict.
            for snapshot in &mut report.snapshots {
                if let Some(previous) = stored.get(&snapshot.key) {
                    snapshot.version = snapshot.version.max(previous + 1);
                }
            }
            self.store.replace_snapshots(&stored, report.snapshots.clone())?;
            Ok(report)
        })?;

        tracing::info!(
            session = %ctx.session_id,
            snapshots = report.snapshots.len(),
            anomalies = report.anomalies.len(),
            "snapshots rebuilt"
        );
        Ok(report)
    }

    /// Current snapshot for a key (empty when nothing was ever recorded there).
    pub fn snapshot(&self, ctx: &LedgerContext, key: &StockKey) -> LedgerResult<StockSnapshot> {
        authorize(&ctx.actor, &Permission::MOVEMENT_READ)?;
        Ok(self
            .store
            .snapshot(key)?
            .unwrap_or_else(|| StockSnapshot::empty(*key)))
    }

    pub fn snapshots(&self, ctx: &LedgerContext, query: &SnapshotQuery) -> LedgerResult<Vec<StockSnapshot>> {
        authorize(&ctx.actor, &Permission::MOVEMENT_READ)?;
        let all = self.store.list_snapshots()?;
        Ok(query.run(&all).into_iter().cloned().collect())
    }

    /// Filtered records in display order, soft-deleted ones included.
    pub fn movements(&self, ctx: &LedgerContext, query: &MovementQuery) -> LedgerResult<Vec<MovementRecord>> {
        authorize(&ctx.actor, &Permission::MOVEMENT_READ)?;
        let all = self.store.list_movements(&MovementFilter::everything())?;
        Ok(query.run(&all).into_iter().cloned().collect())
    }

    pub fn version_chains(&self, ctx: &LedgerContext) -> LedgerResult<BTreeMap<ReferenceKey, VersionChain>> {
        authorize(&ctx.actor, &Permission::MOVEMENT_READ)?;
        let records = newest_created_first(self.store.list_movements(&MovementFilter::everything())?);
        Ok(group(&records))
    }

    /// Every version recorded under one reference key.
    pub fn history(&self, ctx: &LedgerContext, reference: &ReferenceKey) -> LedgerResult<Option<VersionChain>> {
        authorize(&ctx.actor, &Permission::MOVEMENT_READ)?;
        let records = self
            .store
            .list_movements(&MovementFilter::everything().reference(reference.clone()))?;
        Ok(group(&newest_created_first(records)).remove(reference))
    }

    pub fn classify(&self, ctx: &LedgerContext, id: RecordId) -> LedgerResult<Classification> {
        authorize(&ctx.actor, &Permission::MOVEMENT_READ)?;
        let stored = self.store.get_movement(id)?.ok_or(LedgerError::NotFound(id))?;
        Ok(classify(&stored.record))
    }

    fn load(&self, id: RecordId) -> LedgerResult<(Movement, u64)> {
        let stored = self.store.get_movement(id)?.ok_or(LedgerError::NotFound(id))?;
        Ok((Movement::from_record(stored.record, stored.version), stored.version))
    }

    fn load_book(&self, keys: &BTreeSet<StockKey>) -> LedgerResult<(StockBook, BTreeMap<StockKey, ExpectedVersion>)> {
        let mut snapshots = Vec::with_capacity(keys.len());
        let mut expected = BTreeMap::new();
        for key in keys {
            match self.store.snapshot(key)? {
                Some(snapshot) => {
                    expected.insert(*key, ExpectedVersion::Exact(snapshot.version));
                    snapshots.push(snapshot);
                }
                None => {
                    expected.insert(*key, ExpectedVersion::Absent);
                }
            }
        }
        Ok((StockBook::from_snapshots(snapshots), expected))
    }

    fn with_retries<T>(
        &self,
        operation: &'static str,
        subject: impl core::fmt::Display,
        mut attempt: impl FnMut() -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut tries = 0;
        loop {
            match attempt() {
                Err(LedgerError::Conflict(reason)) if tries < self.config.commit_retries => {
                    tries += 1;
                    tracing::warn!(operation, %subject, attempt = tries, %reason, "commit conflict, retrying");
                }
                other => return other,
            }
        }
    }

    fn publish(&self, ctx: &LedgerContext, events: Vec<MovementEvent>) {
        for event in events {
            self.publish_one(ctx, event.record_id(), LedgerEvent::Movement(event));
        }
    }

    fn publish_one(&self, ctx: &LedgerContext, record: RecordId, event: LedgerEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event_type = event.event_type();
        let notice = EventEnvelope::new(ctx.session_id, record, sequence, event);
        // The transition is committed; a lost notice only delays a refresh.
        if let Err(err) = self.bus.publish(notice) {
            tracing::warn!(record = %record, event_type, error = ?err, "failed to publish ledger notice");
        }
    }
}

fn decide(mut movement: Movement, command: &MovementCommand) -> LedgerResult<(Movement, Vec<MovementEvent>)> {
    let events = movement.handle(command)?;
    for event in &events {
        movement.apply(event);
    }
    Ok((movement, events))
}

fn apply_all(mut movement: Movement, events: &[MovementEvent]) -> Movement {
    for event in events {
        movement.apply(event);
    }
    movement
}

fn current_record(movement: &Movement) -> LedgerResult<&MovementRecord> {
    movement.record().ok_or(LedgerError::NotFound(*movement.id()))
}

fn record_of(movement: Movement) -> LedgerResult<MovementRecord> {
    let id = *movement.id();
    movement.into_record().ok_or(LedgerError::NotFound(id))
}

fn effects_for(record: &MovementRecord) -> LedgerResult<Vec<StockEffect>> {
    effects_of(record).map_err(|reason| LedgerError::validation_field(Some(record.id), "items", reason.0))
}

/// Pending versions share a transaction date, so creation order breaks the tie.
fn newest_created_first(mut records: Vec<MovementRecord>) -> Vec<MovementRecord> {
    records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    records
}

fn keys_of(effects: &[StockEffect]) -> BTreeSet<StockKey> {
    effects.iter().map(|e| e.key).collect()
}

/// Add every snapshot in `expected` to `write`, guarded by the version read.
fn stock_write(
    mut write: LedgerWrite,
    book: &StockBook,
    expected: &BTreeMap<StockKey, ExpectedVersion>,
) -> LedgerWrite {
    for (key, version) in expected {
        write = write.snapshot(book.snapshot(key), *version);
    }
    write
}

/// A reversal that would overdraw means the stock already left.
fn already_consumed(err: LedgerError) -> LedgerError {
    match err {
        LedgerError::InsufficientStock {
            record,
            location,
            product,
            requested,
            available,
            ..
        } => LedgerError::StockAlreadyConsumed {
            record,
            location,
            product,
            consumed_by: None,
            reason: format!("reversal needs {requested} but only {available} remain"),
        },
        other => other,
    }
}
