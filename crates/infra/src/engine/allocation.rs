//! FIFO preview and commit.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info;

use lotflow_core::{ActorId, DomainError, ProductId, WarehouseId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_inventory::{AllocationPreview, MovementKind, MovementLine, NewMovement};

use super::ledger::{Draft, ensure_consuming_kind};
use super::{InventoryEngine, locked_lot, require_warehouse};
use crate::error::EngineResult;
use crate::store::{InventoryStore, StoreTx};

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Read-only FIFO plan over committed stock. Takes no locks.
    pub fn allocate_fifo(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
    ) -> EngineResult<AllocationPreview> {
        let lots = self.store.lots()?;
        Ok(lotflow_inventory::allocate_fifo(product_id, warehouse_id, quantity, &lots)?)
    }

    /// Apply a complete preview: decrement each lot under lock and record one
    /// OUT movement of `kind`.
    pub fn commit_allocation(
        &self,
        preview: &AllocationPreview,
        kind: MovementKind,
        actor: ActorId,
        note: Option<String>,
    ) -> EngineResult<Vec<MovementLine>> {
        ensure_consuming_kind(kind)?;
        let preview = preview.clone().require_complete()?;

        self.transact("commit_allocation", |tx, _| {
            require_warehouse(tx, preview.warehouse_id)?;
            let mut draft = Draft::open(
                NewMovement {
                    kind,
                    source_warehouse: preview.warehouse_id,
                    destination_warehouse: None,
                    reference: None,
                    note,
                },
                actor,
                Utc::now(),
            )?;

            apply_preview(tx, &preview, &mut draft)?;
            let (movement, lines) = draft.finish(tx)?;

            info!(
                product_id = %preview.product_id,
                warehouse_id = %preview.warehouse_id,
                quantity = preview.covered,
                lots = lines.len(),
                movement_id = %movement.id_typed(),
                "allocation committed"
            );
            Ok(lines)
        })
    }
}

/// Decrement every lot of `preview`, re-checking it under lock first.
///
/// Lots are locked in ascending id order. A lot that no longer holds what the
/// preview took (consumed, moved or retired meanwhile) is a concurrency
/// conflict.
pub(crate) fn apply_preview<T: StoreTx>(
    tx: &mut T,
    preview: &AllocationPreview,
    draft: &mut Draft,
) -> EngineResult<()> {
    let mut lines = preview.lines.clone();
    lines.sort_by_key(|l| l.lot_id);

    for taken in &lines {
        let mut lot = locked_lot(tx, taken.lot_id)?;
        if !lot.is_active()
            || !lot.holds(preview.product_id, preview.warehouse_id)
            || lot.quantity() < taken.quantity
        {
            return Err(DomainError::conflict(format!(
                "lot {} changed since the allocation was planned (holds {}, plan takes {})",
                taken.lot_id,
                lot.quantity(),
                taken.quantity
            ))
            .into());
        }

        draft.record(&lot, taken.quantity)?;
        lot.adjust_quantity(-taken.quantity)?;
        tx.update_lot(lot)?;
    }
    Ok(())
}
