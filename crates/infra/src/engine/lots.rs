//! Lot store operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use lotflow_core::{ActorId, DomainError, ProductId, WarehouseId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_incidents::Incident;
use lotflow_inventory::{Lot, LotId, Movement, MovementKind, NewLot, NewMovement};

use super::incidents::{IncidentLineInput, file_incident};
use super::ledger::Draft;
use super::{InventoryEngine, locked_lot, require_product, require_warehouse};
use crate::error::EngineResult;
use crate::store::{InventoryStore, StoreTx};

/// A delivery from a supplier, checked against what was expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub expected: i64,
    pub received: i64,
    pub unit_cost: i64,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub lot: Lot,
    pub movement: Movement,
    /// Filed when fewer units arrived than expected.
    pub incident: Option<Incident>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub original: Lot,
    pub split: Lot,
}

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Register a lot as-is. No movement is recorded; use `receive_stock`
    /// for supplier deliveries.
    pub fn create_lot(&self, new: NewLot, actor: ActorId) -> EngineResult<Lot> {
        self.transact("create_lot", |tx, _| {
            require_product(tx, new.product_id)?;
            require_warehouse(tx, new.warehouse_id)?;
            let lot = Lot::create(LotId::generate(), new, actor, Utc::now())?;
            tx.insert_lot(lot.clone())?;
            info!(
                lot_id = %lot.id_typed(),
                product_id = %lot.product_id(),
                warehouse_id = %lot.warehouse_id(),
                quantity = lot.quantity(),
                "lot created"
            );
            Ok(lot)
        })
    }

    /// Book a supplier delivery: new lot plus a receiving movement, and an
    /// incident for any shortfall against `expected`.
    pub fn receive_stock(&self, receipt: ReceiveStock, actor: ActorId) -> EngineResult<Receipt> {
        if receipt.received <= 0 {
            return Err(DomainError::validation("received quantity must be positive").into());
        }
        if receipt.received > receipt.expected {
            return Err(DomainError::validation(format!(
                "received {} exceeds expected {}",
                receipt.received, receipt.expected
            ))
            .into());
        }

        self.transact("receive_stock", |tx, outbox| {
            require_product(tx, receipt.product_id)?;
            require_warehouse(tx, receipt.warehouse_id)?;
            let now = Utc::now();

            let lot = Lot::create(
                LotId::generate(),
                NewLot {
                    product_id: receipt.product_id,
                    warehouse_id: receipt.warehouse_id,
                    quantity: receipt.received,
                    unit_cost: receipt.unit_cost,
                    received_at: receipt.received_at.unwrap_or(now),
                    location: receipt.location.clone(),
                    source_ref: receipt.source_ref.clone(),
                },
                actor,
                now,
            )?;
            tx.insert_lot(lot.clone())?;

            let mut draft = Draft::open(
                NewMovement {
                    kind: MovementKind::Receiving,
                    source_warehouse: receipt.warehouse_id,
                    destination_warehouse: None,
                    reference: receipt.source_ref.clone(),
                    note: None,
                },
                actor,
                now,
            )?;
            draft.record(&lot, receipt.received)?;
            let (movement, _) = draft.finish(tx)?;

            let missing = receipt.expected - receipt.received;
            let incident = if missing > 0 {
                let description = format!(
                    "receiving {}: expected {}, received {}",
                    receipt.source_ref.as_deref().unwrap_or("without reference"),
                    receipt.expected,
                    receipt.received
                );
                let lines = [IncidentLineInput {
                    product_id: receipt.product_id,
                    quantity_difference: missing,
                    reference_lot: lot.id_typed(),
                }];
                Some(file_incident(tx, outbox, &self.config, description, &lines, actor, now)?)
            } else {
                None
            };

            info!(
                lot_id = %lot.id_typed(),
                movement_id = %movement.id_typed(),
                received = receipt.received,
                missing,
                "stock received"
            );
            Ok(Receipt {
                lot,
                movement,
                incident,
            })
        })
    }

    /// Change a lot's quantity outside any workflow: a receiving movement for
    /// positive deltas, a shrinkage movement for negative ones.
    pub fn adjust_lot_quantity(
        &self,
        lot_id: LotId,
        delta: i64,
        actor: ActorId,
        note: Option<String>,
    ) -> EngineResult<Lot> {
        if delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero").into());
        }

        self.transact("adjust_lot_quantity", |tx, _| {
            let mut lot = locked_lot(tx, lot_id)?;
            let kind = if delta > 0 {
                MovementKind::Receiving
            } else {
                MovementKind::Shrinkage
            };

            lot.adjust_quantity(delta)?;
            let mut draft = Draft::open(
                NewMovement {
                    kind,
                    source_warehouse: lot.warehouse_id(),
                    destination_warehouse: None,
                    reference: Some(format!("lot {lot_id}")),
                    note,
                },
                actor,
                Utc::now(),
            )?;
            draft.record(&lot, delta.abs())?;
            draft.finish(tx)?;
            tx.update_lot(lot.clone())?;

            info!(%lot_id, delta, quantity = lot.quantity(), "lot adjusted");
            Ok(lot)
        })
    }

    /// Move a whole lot to another warehouse, keeping its identity.
    pub fn relocate_lot(
        &self,
        lot_id: LotId,
        destination: WarehouseId,
        actor: ActorId,
        note: Option<String>,
    ) -> EngineResult<Lot> {
        self.transact("relocate_lot", |tx, _| {
            require_warehouse(tx, destination)?;
            let mut lot = locked_lot(tx, lot_id)?;
            if lot.quantity() == 0 {
                return Err(DomainError::validation(format!("lot {lot_id} is empty")).into());
            }
            let source = lot.warehouse_id();
            let quantity = lot.quantity();
            let now = Utc::now();

            let (mut outbound, mut inbound) =
                transfer_pair(source, destination, Some(format!("lot {lot_id}")), note, actor, now)?;
            outbound.record(&lot, quantity)?;
            lot.relocate(destination)?;
            inbound.record(&lot, quantity)?;

            tx.update_lot(lot.clone())?;
            outbound.finish(tx)?;
            inbound.finish(tx)?;

            info!(%lot_id, from = %source, to = %destination, quantity, "lot relocated");
            Ok(lot)
        })
    }

    /// Carve `quantity` off a lot into a new lot in the same warehouse.
    pub fn split_lot(&self, lot_id: LotId, quantity: i64, actor: ActorId) -> EngineResult<SplitOutcome> {
        self.transact("split_lot", |tx, _| {
            let mut original = locked_lot(tx, lot_id)?;
            let split = original.split(quantity, LotId::generate(), actor, Utc::now())?;
            tx.update_lot(original.clone())?;
            tx.insert_lot(split.clone())?;

            info!(%lot_id, split_id = %split.id_typed(), quantity, "lot split");
            Ok(SplitOutcome { original, split })
        })
    }

    /// Soft-delete an emptied lot.
    pub fn retire_lot(&self, lot_id: LotId, actor: ActorId) -> EngineResult<Lot> {
        self.transact("retire_lot", |tx, _| {
            let mut lot = locked_lot(tx, lot_id)?;
            lot.retire()?;
            tx.update_lot(lot.clone())?;
            info!(%lot_id, %actor, "lot retired");
            Ok(lot)
        })
    }

    /// Sum of active lot quantities for (`product_id`, `warehouse_id`).
    pub fn stock_on_hand(&self, product_id: ProductId, warehouse_id: WarehouseId) -> EngineResult<i64> {
        Ok(self
            .lots_for(product_id, warehouse_id)?
            .iter()
            .map(Lot::quantity)
            .sum())
    }

    /// Active lots for (`product_id`, `warehouse_id`) in FIFO order.
    pub fn lots_for(&self, product_id: ProductId, warehouse_id: WarehouseId) -> EngineResult<Vec<Lot>> {
        let mut lots: Vec<Lot> = self
            .store
            .lots()?
            .into_iter()
            .filter(|lot| lot.is_active() && lot.holds(product_id, warehouse_id))
            .collect();
        lots.sort_by_key(|lot| (lot.received_at(), lot.id_typed()));
        Ok(lots)
    }
}

/// Transfer-out/transfer-in drafts for a move from `source` to `destination`.
pub(crate) fn transfer_pair(
    source: WarehouseId,
    destination: WarehouseId,
    reference: Option<String>,
    note: Option<String>,
    actor: ActorId,
    at: DateTime<Utc>,
) -> EngineResult<(Draft, Draft)> {
    let movement = |kind| NewMovement {
        kind,
        source_warehouse: source,
        destination_warehouse: Some(destination),
        reference: reference.clone(),
        note: note.clone(),
    };
    Ok((
        Draft::open(movement(MovementKind::TransferOut), actor, at)?,
        Draft::open(movement(MovementKind::TransferIn), actor, at)?,
    ))
}

/// Move `quantity` of the locked `lot` to `destination`: the lot itself when
/// the quantity empties it, a split-off lot otherwise. Stages both rows and
/// returns the lot now holding the units at `destination`.
pub(crate) fn carry<T: StoreTx>(
    tx: &mut T,
    mut lot: Lot,
    quantity: i64,
    destination: WarehouseId,
    actor: ActorId,
    at: DateTime<Utc>,
) -> EngineResult<Lot> {
    if quantity == lot.quantity() {
        lot.relocate(destination)?;
        tx.update_lot(lot.clone())?;
        return Ok(lot);
    }

    let mut moved = lot.split(quantity, LotId::generate(), actor, at)?;
    moved.relocate(destination)?;
    tx.update_lot(lot)?;
    tx.insert_lot(moved.clone())?;
    Ok(moved)
}
