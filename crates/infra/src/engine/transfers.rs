//! Transfer workflow: request, approve with stock relocation, reject with
//! escalation to the central warehouse.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use lotflow_core::{ActorId, Aggregate, DomainError, WarehouseId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_inventory::allocate_fifo;
use lotflow_transfers::{
    ApproveTransfer, RejectTransfer, RequestTransfer, TransferCommand, TransferId, TransferLine,
    TransferRequest,
};

use super::lots::{carry, transfer_pair};
use super::{InventoryEngine, found, locked_lot, require_product, require_warehouse};
use crate::error::EngineResult;
use crate::store::{InventoryStore, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequestInput {
    /// Warehouse asking for stock.
    pub requester: WarehouseId,
    /// Warehouse expected to provide it.
    pub supplier: WarehouseId,
    pub lines: Vec<TransferLine>,
    #[serde(default)]
    pub note: Option<String>,
}

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn request_transfer(
        &self,
        input: TransferRequestInput,
        actor: ActorId,
    ) -> EngineResult<TransferRequest> {
        self.transact("request_transfer", |tx, outbox| {
            require_warehouse(tx, input.requester)?;
            require_warehouse(tx, input.supplier)?;
            for line in &input.lines {
                require_product(tx, line.product_id)?;
            }

            let transfer_id = TransferId::generate();
            let mut transfer = TransferRequest::empty(transfer_id);
            let events = transfer.execute(&TransferCommand::RequestTransfer(RequestTransfer {
                transfer_id,
                requester: input.requester,
                supplier: input.supplier,
                lines: input.lines,
                note: input.note,
                actor,
                escalated_from: None,
                occurred_at: Utc::now(),
            }))?;
            tx.save_transfer(transfer.clone())?;
            outbox.record(actor, transfer_id.0, "transfer_request", &events);

            info!(
                %transfer_id,
                requester = %transfer.requester(),
                supplier = %transfer.supplier(),
                lines = transfer.lines().len(),
                "transfer requested"
            );
            Ok(transfer)
        })
    }

    /// Approve a pending request and move its stock, all lines or none.
    ///
    /// Supplier lots are locked per product (ascending product id, then
    /// ascending lot id) before FIFO runs over them. Any shortfall aborts with
    /// every shortfall listed and the request left pending.
    pub fn approve_transfer(
        &self,
        transfer_id: TransferId,
        actor: ActorId,
        note: Option<String>,
    ) -> EngineResult<TransferRequest> {
        self.transact("approve_transfer", |tx, outbox| {
            let mut transfer = found(tx.lock_transfer(transfer_id)?, || {
                format!("transfer request {transfer_id}")
            })?;
            transfer.ensure_pending("approve")?;

            let supplier = transfer.supplier();
            let requester = transfer.requester();
            let mut lines = transfer.lines().to_vec();
            lines.sort_by_key(|l| l.product_id);

            let mut previews = Vec::with_capacity(lines.len());
            let mut shortfalls = Vec::new();
            for line in &lines {
                let lots = tx.lock_lots_for(line.product_id, supplier)?;
                let preview = allocate_fifo(line.product_id, supplier, line.quantity, &lots)?;
                if !preview.complete {
                    shortfalls.push(preview.to_shortfall(None));
                }
                previews.push(preview);
            }
            if !shortfalls.is_empty() {
                warn!(%transfer_id, %supplier, shortfalls = shortfalls.len(), "transfer approval short of stock");
                return Err(DomainError::InsufficientStock(shortfalls).into());
            }

            let now = Utc::now();
            let (mut outbound, mut inbound) = transfer_pair(
                supplier,
                requester,
                Some(format!("transfer {transfer_id}")),
                note.clone(),
                actor,
                now,
            )?;

            for preview in &previews {
                for taken in &preview.lines {
                    let lot = locked_lot(tx, taken.lot_id)?;
                    outbound.record(&lot, taken.quantity)?;
                    let moved = carry(tx, lot, taken.quantity, requester, actor, now)?;
                    inbound.record(&moved, taken.quantity)?;
                }
            }

            let events = transfer.execute(&TransferCommand::ApproveTransfer(ApproveTransfer {
                transfer_id,
                actor,
                note,
                outbound_movement: outbound.id(),
                inbound_movement: inbound.id(),
                occurred_at: now,
            }))?;
            let (out_movement, out_lines) = outbound.finish(tx)?;
            let (in_movement, _) = inbound.finish(tx)?;
            tx.save_transfer(transfer.clone())?;
            outbox.record(actor, transfer_id.0, "transfer_request", &events);

            info!(
                %transfer_id,
                outbound_movement = %out_movement.id_typed(),
                inbound_movement = %in_movement.id_typed(),
                lots = out_lines.len(),
                "transfer approved"
            );
            Ok(transfer)
        })
    }

    /// Reject a pending request. Unless the central warehouse is already a
    /// party, the same lines are re-requested from it and linked both ways.
    pub fn reject_transfer(
        &self,
        transfer_id: TransferId,
        actor: ActorId,
        note: Option<String>,
    ) -> EngineResult<TransferRequest> {
        let central = self.config.central_warehouse;

        self.transact("reject_transfer", |tx, outbox| {
            let mut transfer = found(tx.lock_transfer(transfer_id)?, || {
                format!("transfer request {transfer_id}")
            })?;
            transfer.ensure_pending("reject")?;
            let now = Utc::now();

            let escalate = transfer.supplier() != central && transfer.requester() != central;
            let escalation = if escalate {
                require_warehouse(tx, central)?;
                let escalated_id = TransferId::generate();
                let mut escalated = TransferRequest::empty(escalated_id);
                let events = escalated.execute(&TransferCommand::RequestTransfer(RequestTransfer {
                    transfer_id: escalated_id,
                    requester: transfer.requester(),
                    supplier: central,
                    lines: transfer.lines().to_vec(),
                    note: transfer.note().map(str::to_string),
                    actor,
                    escalated_from: Some(transfer_id),
                    occurred_at: now,
                }))?;
                tx.save_transfer(escalated)?;
                Some((escalated_id, events))
            } else {
                None
            };
            let escalated_to = escalation.as_ref().map(|(id, _)| *id);

            let events = transfer.execute(&TransferCommand::RejectTransfer(RejectTransfer {
                transfer_id,
                actor,
                note,
                escalated_to,
                occurred_at: now,
            }))?;
            tx.save_transfer(transfer.clone())?;
            outbox.record(actor, transfer_id.0, "transfer_request", &events);

            match escalation {
                Some((escalated_id, events)) => {
                    outbox.record(actor, escalated_id.0, "transfer_request", &events);
                    info!(%transfer_id, %escalated_id, %central, "transfer rejected, escalated to central");
                }
                None => info!(%transfer_id, "transfer rejected"),
            }
            Ok(transfer)
        })
    }
}
