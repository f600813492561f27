//! Movement lifecycle (PENDING → CONFIRMED) as an aggregate.
//!
//! `handle` enforces the status guards and input validation. Checks that
//! need stock snapshots (availability on confirm, consumption on delete) are
//! made by the caller against the same effect list this crate computes, inside
//! the transaction that commits the emitted events.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_auth::{Actor, Permission, authorize};
use stockledger_core::{Aggregate, AggregateRoot, LedgerError, LocationRef, RecordId, RecordKind};
use stockledger_events::Event;

use crate::movement::{InventoryType, LedgerStatus, MovementAction, MovementItem, MovementRecord};

/// Input for a new movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub inventory_type: InventoryType,
    pub from_location: Option<LocationRef>,
    pub to_location: Option<LocationRef>,
    pub items: Vec<MovementItem>,
    pub reference_number: Option<String>,
    pub remarks: Option<String>,
    pub transaction_date: DateTime<Utc>,
}

/// Partial update of a pending movement. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPatch {
    pub items: Option<Vec<MovementItem>>,
    pub from_location: Option<Option<LocationRef>>,
    pub to_location: Option<Option<LocationRef>>,
    pub remarks: Option<Option<String>>,
    pub transaction_date: Option<DateTime<Utc>>,
}

impl MovementPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMovement {
    pub id: RecordId,
    pub movement: NewMovement,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditMovement {
    /// Id for the replacement version.
    pub replacement_id: RecordId,
    pub patch: MovementPatch,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmMovement {
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMovement {
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementCommand {
    Create(CreateMovement),
    Edit(EditMovement),
    Confirm(ConfirmMovement),
    Delete(DeleteMovement),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCreated {
    pub record: MovementRecord,
    pub occurred_at: DateTime<Utc>,
}

/// The record was replaced by a new version sharing its reference number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementSuperseded {
    pub id: RecordId,
    pub replacement: MovementRecord,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementConfirmed {
    pub id: RecordId,
    pub confirmed_by: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDeleted {
    pub id: RecordId,
    pub deleted_by: String,
    /// Set when the record was confirmed and its stock effect must be reversed.
    pub reverses_stock: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementEvent {
    Created(MovementCreated),
    Superseded(MovementSuperseded),
    Confirmed(MovementConfirmed),
    Deleted(MovementDeleted),
}

impl MovementEvent {
    pub fn record_id(&self) -> RecordId {
        match self {
            MovementEvent::Created(e) => e.record.id,
            MovementEvent::Superseded(e) => e.id,
            MovementEvent::Confirmed(e) => e.id,
            MovementEvent::Deleted(e) => e.id,
        }
    }
}

impl Event for MovementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MovementEvent::Created(_) => "inventory.movement.created",
            MovementEvent::Superseded(_) => "inventory.movement.superseded",
            MovementEvent::Confirmed(_) => "inventory.movement.confirmed",
            MovementEvent::Deleted(_) => "inventory.movement.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MovementEvent::Created(e) => e.occurred_at,
            MovementEvent::Superseded(e) => e.occurred_at,
            MovementEvent::Confirmed(e) => e.occurred_at,
            MovementEvent::Deleted(e) => e.occurred_at,
        }
    }
}

/// Aggregate root: one movement record and its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    id: RecordId,
    record: Option<MovementRecord>,
    version: u64,
}

impl Movement {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: RecordId) -> Self {
        Self {
            id,
            record: None,
            version: 0,
        }
    }

    /// Rehydrate from a stored record at its stored version.
    pub fn from_record(record: MovementRecord, version: u64) -> Self {
        Self {
            id: record.id,
            record: Some(record),
            version,
        }
    }

    pub fn record(&self) -> Option<&MovementRecord> {
        self.record.as_ref()
    }

    pub fn into_record(self) -> Option<MovementRecord> {
        self.record
    }

    pub fn status(&self) -> Option<LedgerStatus> {
        self.record.as_ref().map(|r| r.status)
    }

    /// Only pending, live movements may be edited.
    pub fn is_modifiable(&self) -> bool {
        self.record
            .as_ref()
            .is_some_and(|r| !r.is_deleted && r.status == LedgerStatus::Pending)
    }

    fn live_record(&self) -> Result<&MovementRecord, LedgerError> {
        let record = self.record.as_ref().ok_or(LedgerError::NotFound(self.id))?;
        if record.is_deleted {
            return Err(LedgerError::validation_field(
                Some(self.id),
                "is_deleted",
                "movement has been deleted",
            ));
        }
        Ok(record)
    }
}

impl AggregateRoot for Movement {
    type Id = RecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Movement {
    type Command = MovementCommand;
    type Event = MovementEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MovementEvent::Created(e) => {
                self.id = e.record.id;
                self.record = Some(e.record.clone());
            }
            MovementEvent::Superseded(e) => {
                if let Some(record) = self.record.as_mut() {
                    record.is_deleted = true;
                    record.deleted_at = Some(e.occurred_at);
                }
            }
            MovementEvent::Confirmed(e) => {
                if let Some(record) = self.record.as_mut() {
                    record.status = LedgerStatus::Confirmed;
                    record.confirmed_at = Some(e.occurred_at);
                    record.verified_at = Some(e.occurred_at);
                    record.confirmed_by = Some(e.confirmed_by.clone());
                }
            }
            MovementEvent::Deleted(e) => {
                if let Some(record) = self.record.as_mut() {
                    record.is_deleted = true;
                    record.deleted_at = Some(e.occurred_at);
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MovementCommand::Create(cmd) => self.handle_create(cmd),
            MovementCommand::Edit(cmd) => self.handle_edit(cmd),
            MovementCommand::Confirm(cmd) => self.handle_confirm(cmd),
            MovementCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Movement {
    fn handle_create(&self, cmd: &CreateMovement) -> Result<Vec<MovementEvent>, LedgerError> {
        if self.record.is_some() {
            return Err(LedgerError::conflict(format!("{} already exists", cmd.id)));
        }
        if cmd.id.kind != RecordKind::Movement {
            return Err(LedgerError::validation_field(
                Some(cmd.id),
                "id",
                "ledger movements must use the movement id space",
            ));
        }
        authorize(&cmd.actor, &Permission::MOVEMENT_WRITE)?;

        let record = build_record(cmd.id, &cmd.movement, &cmd.actor, cmd.occurred_at);
        validate_movement(&record)?;

        Ok(vec![MovementEvent::Created(MovementCreated {
            record,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_edit(&self, cmd: &EditMovement) -> Result<Vec<MovementEvent>, LedgerError> {
        let current = self.live_record()?;
        if current.status == LedgerStatus::Confirmed {
            return Err(LedgerError::ImmutableState { record: self.id });
        }
        authorize(&cmd.actor, &Permission::MOVEMENT_WRITE)?;
        if cmd.patch.is_empty() {
            return Err(LedgerError::validation_field(Some(self.id), "patch", "nothing to change"));
        }

        let mut replacement = current.clone();
        let patch = &cmd.patch;
        if let Some(items) = &patch.items {
            replacement.items = items.clone();
        }
        if let Some(from) = patch.from_location {
            replacement.from_location = from;
        }
        if let Some(to) = patch.to_location {
            replacement.to_location = to;
        }
        if let Some(remarks) = &patch.remarks {
            replacement.remarks = remarks.clone();
        }
        if let Some(date) = patch.transaction_date {
            replacement.transaction_date = Some(date);
        }
        replacement.id = cmd.replacement_id;
        replacement.action = action_for(replacement.inventory_type, replacement.from_location, replacement.to_location);
        replacement.created_at = Some(cmd.occurred_at);
        replacement.verified_at = None;
        replacement.processed_by = cmd.actor.display_name().map(str::to_string);
        validate_movement(&replacement)?;

        Ok(vec![MovementEvent::Superseded(MovementSuperseded {
            id: self.id,
            replacement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmMovement) -> Result<Vec<MovementEvent>, LedgerError> {
        let current = self.live_record()?;
        if current.status != LedgerStatus::Pending {
            return Err(LedgerError::validation_field(
                Some(self.id),
                "status",
                "only pending movements can be confirmed",
            ));
        }
        authorize(&cmd.actor, &Permission::MOVEMENT_CONFIRM)?;

        Ok(vec![MovementEvent::Confirmed(MovementConfirmed {
            id: self.id,
            confirmed_by: cmd.actor.name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteMovement) -> Result<Vec<MovementEvent>, LedgerError> {
        let current = self.live_record()?;
        let reverses_stock = current.status == LedgerStatus::Confirmed;
        if reverses_stock {
            authorize(&cmd.actor, &Permission::MOVEMENT_DELETE_CONFIRMED)?;
        }

        Ok(vec![MovementEvent::Deleted(MovementDeleted {
            id: self.id,
            deleted_by: cmd.actor.name.trim().to_string(),
            reverses_stock,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn action_for(
    inventory_type: InventoryType,
    from: Option<LocationRef>,
    to: Option<LocationRef>,
) -> MovementAction {
    match inventory_type {
        InventoryType::StockIn | InventoryType::Return => MovementAction::Add,
        InventoryType::Damage => MovementAction::Subtract,
        InventoryType::Transfer => match (from, to) {
            (None, Some(_)) => MovementAction::Add,
            (Some(_), None) => MovementAction::Subtract,
            _ => MovementAction::Process,
        },
        _ => MovementAction::Unknown,
    }
}

fn build_record(id: RecordId, input: &NewMovement, actor: &Actor, at: DateTime<Utc>) -> MovementRecord {
    let mut record = MovementRecord::new(
        id,
        input.inventory_type,
        action_for(input.inventory_type, input.from_location, input.to_location),
    );
    record.items = input.items.clone();
    record.from_location = input.from_location;
    record.to_location = input.to_location;
    record.reference_number = input
        .reference_number
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .or_else(|| Some(format!("REF-{}", id.id)));
    record.remarks = input.remarks.clone();
    record.transaction_date = Some(input.transaction_date);
    record.created_at = Some(at);
    record.processed_by = actor.display_name().map(str::to_string);
    record.status = LedgerStatus::Pending;
    record
}

/// Structural checks shared by create and edit.
pub fn validate_movement(record: &MovementRecord) -> Result<(), LedgerError> {
    let id = Some(record.id);

    if !record.inventory_type.is_ledger_movement() {
        return Err(LedgerError::validation_field(
            id,
            "inventory_type",
            format!("{} records are created by their own subsystem", record.inventory_type.as_str()),
        ));
    }
    if record.processed_by.as_deref().is_none_or(|p| p.trim().is_empty()) {
        return Err(LedgerError::validation_field(id, "processed_by", "processed_by is required"));
    }
    if record.items.is_empty() {
        return Err(LedgerError::validation_field(id, "items", "at least one item line is required"));
    }

    let mut seen = HashSet::with_capacity(record.items.len());
    for (idx, item) in record.items.iter().enumerate() {
        if item.quantity == 0 {
            return Err(LedgerError::validation_field(
                id,
                format!("items[{idx}].quantity"),
                "quantity must be positive",
            ));
        }
        if !seen.insert(item.line_key()) {
            return Err(LedgerError::validation_field(
                id,
                format!("items[{idx}]"),
                format!("duplicate line for product {}", item.product_id),
            ));
        }
    }

    match record.inventory_type {
        InventoryType::StockIn | InventoryType::Damage => {
            if record.to_location.is_none() {
                return Err(LedgerError::validation_field(id, "to_location", "destination is required"));
            }
            if record.from_location.is_some() {
                return Err(LedgerError::validation_field(
                    id,
                    "from_location",
                    format!("{} records take a destination only", record.inventory_type.as_str()),
                ));
            }
        }
        InventoryType::Transfer | InventoryType::Return => {
            let (Some(from), Some(to)) = (record.from_location, record.to_location) else {
                let field = if record.from_location.is_none() { "from_location" } else { "to_location" };
                return Err(LedgerError::validation_field(id, field, "both source and destination are required"));
            };
            if from == to {
                return Err(LedgerError::validation_field(id, "to_location", "source and destination must differ"));
            }
        }
        _ => {}
    }

    Ok(())
}
