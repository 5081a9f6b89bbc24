//! Movement ledger operations.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use lotflow_core::{ActorId, DomainError, ProductId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_inventory::{
    Direction, Lot, LotId, Movement, MovementId, MovementKind, MovementLine, MovementLineId,
    NewMovement,
};

use super::{InventoryEngine, found, locked_lot, require_warehouse};
use crate::error::EngineResult;
use crate::store::{InventoryStore, StoreTx};

/// A movement being written inside a transaction: opened, filled line by
/// line, then terminated and staged in one go.
pub(crate) struct Draft {
    movement: Movement,
    lines: Vec<MovementLine>,
}

impl Draft {
    pub(crate) fn open(new: NewMovement, actor: ActorId, at: DateTime<Utc>) -> EngineResult<Self> {
        Ok(Self {
            movement: Movement::open(MovementId::generate(), new, actor, at)?,
            lines: Vec::new(),
        })
    }

    pub(crate) fn compensating(
        original: &Movement,
        note: Option<String>,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> EngineResult<Self> {
        Ok(Self {
            movement: Movement::compensating(MovementId::generate(), original, note, actor, at)?,
            lines: Vec::new(),
        })
    }

    pub(crate) fn id(&self) -> MovementId {
        self.movement.id_typed()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Record `quantity` of `lot` at its current unit cost.
    pub(crate) fn record(&mut self, lot: &Lot, quantity: i64) -> EngineResult<()> {
        let line = self.movement.line_for(MovementLineId::generate(), lot, quantity)?;
        self.lines.push(line);
        Ok(())
    }

    /// Terminate and stage the movement with its lines.
    pub(crate) fn finish<T: StoreTx>(mut self, tx: &mut T) -> EngineResult<(Movement, Vec<MovementLine>)> {
        self.movement.terminate(&self.lines)?;
        tx.insert_movement(self.movement.clone(), self.lines.clone())?;
        Ok((self.movement, self.lines))
    }
}

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open an empty PENDING movement.
    pub fn create_movement(&self, new: NewMovement, actor: ActorId) -> EngineResult<Movement> {
        self.transact("create_movement", |tx, _| {
            require_warehouse(tx, new.source_warehouse)?;
            if let Some(destination) = new.destination_warehouse {
                require_warehouse(tx, destination)?;
            }
            let movement = Movement::open(MovementId::generate(), new, actor, Utc::now())?;
            tx.insert_movement(movement.clone(), Vec::new())?;
            info!(
                movement_id = %movement.id_typed(),
                kind = ?movement.kind(),
                "movement opened"
            );
            Ok(movement)
        })
    }

    /// Append a line to a PENDING movement, snapshotting the lot's unit cost,
    /// and apply it to the lot in the movement's direction.
    pub fn add_movement_line(
        &self,
        movement_id: MovementId,
        product_id: ProductId,
        lot_id: LotId,
        quantity: i64,
    ) -> EngineResult<MovementLine> {
        self.transact("add_movement_line", |tx, _| {
            let movement = found(tx.lock_movement(movement_id)?, || {
                format!("movement {movement_id}")
            })?;
            if movement.kind().is_relocation() {
                return Err(DomainError::validation(format!(
                    "{:?} lines are written by the relocation operations",
                    movement.kind()
                ))
                .into());
            }
            let mut lot = locked_lot(tx, lot_id)?;
            if lot.product_id() != product_id {
                return Err(DomainError::validation(format!(
                    "lot {lot_id} holds product {}, not {product_id}",
                    lot.product_id()
                ))
                .into());
            }
            ensure_in_source(&movement, &lot)?;

            let line = movement.line_for(MovementLineId::generate(), &lot, quantity)?;
            match movement.direction() {
                Direction::Out => lot.adjust_quantity(-quantity)?,
                Direction::In => lot.adjust_quantity(quantity)?,
            }
            tx.update_lot(lot)?;
            tx.append_movement_line(line.clone())?;
            Ok(line)
        })
    }

    /// Derive totals from the lines and freeze the movement.
    pub fn terminate_movement(&self, movement_id: MovementId) -> EngineResult<Movement> {
        self.transact("terminate_movement", |tx, _| {
            let mut movement = found(tx.lock_movement(movement_id)?, || {
                format!("movement {movement_id}")
            })?;
            let lines = tx.movement_lines(movement_id)?;
            let totals = movement.terminate(&lines)?;
            tx.update_movement(movement.clone())?;
            info!(
                %movement_id,
                lines = totals.lines,
                quantity = totals.quantity,
                cost = totals.cost,
                "movement terminated"
            );
            Ok(movement)
        })
    }

    /// Undo a terminated stock-creating or stock-consuming movement with a
    /// compensating one. Relocations are undone by a counter-transfer instead.
    pub fn reverse_movement(
        &self,
        movement_id: MovementId,
        actor: ActorId,
        note: Option<String>,
    ) -> EngineResult<Movement> {
        self.transact("reverse_movement", |tx, _| {
            let original = found(tx.lock_movement(movement_id)?, || {
                format!("movement {movement_id}")
            })?;
            if original.kind().is_relocation() {
                return Err(DomainError::validation(format!(
                    "{:?} movements are reversed with a counter-transfer",
                    original.kind()
                ))
                .into());
            }
            if let Some(existing) = tx.reversal_of(movement_id)? {
                return Err(DomainError::invalid_transition(
                    "movement",
                    format!("reversed by {existing}"),
                    "reverse",
                )
                .into());
            }

            let mut draft = Draft::compensating(&original, note, actor, Utc::now())?;
            let mut lines = tx.movement_lines(movement_id)?;
            lines.sort_by_key(|l| l.lot_id);

            for line in &lines {
                let mut lot = locked_lot(tx, line.lot_id)?;
                ensure_in_source(&original, &lot)?;
                match original.direction() {
                    Direction::Out => lot.adjust_quantity(line.quantity)?,
                    Direction::In => {
                        if lot.quantity() < line.quantity {
                            return Err(DomainError::insufficient(
                                line.product_id,
                                line.quantity,
                                lot.quantity(),
                            )
                            .into());
                        }
                        lot.adjust_quantity(-line.quantity)?;
                    }
                }
                draft.record(&lot, line.quantity)?;
                tx.update_lot(lot)?;
            }

            let (reversal, _) = draft.finish(tx)?;
            info!(
                %movement_id,
                reversal_id = %reversal.id_typed(),
                lines = lines.len(),
                "movement reversed"
            );
            Ok(reversal)
        })
    }
}

/// A non-relocation movement only touches lots in its source warehouse.
fn ensure_in_source(movement: &Movement, lot: &Lot) -> EngineResult<()> {
    if lot.warehouse_id() != movement.source_warehouse() {
        return Err(DomainError::validation(format!(
            "lot {} is in warehouse {}, movement {} records warehouse {}",
            lot.id_typed(),
            lot.warehouse_id(),
            movement.id_typed(),
            movement.source_warehouse()
        ))
        .into());
    }
    Ok(())
}

/// Kinds a plain allocation commit may record.
pub(crate) fn ensure_consuming_kind(kind: MovementKind) -> EngineResult<()> {
    match kind {
        MovementKind::Sale | MovementKind::Shrinkage | MovementKind::Transformation => Ok(()),
        other => Err(DomainError::validation(format!(
            "{other:?} is not a stock-consuming movement kind"
        ))
        .into()),
    }
}
