//! Delivery reconciliation: sell what reached the customer, return the rest
//! of the load to the route's open tara warehouse.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use lotflow_core::{ActorId, Aggregate, DomainError, ProductId, WarehouseId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_inventory::{Lot, LotId, MovementKind, NewMovement, allocate_single_or_fifo};
use lotflow_sales::{RecordDelivery, SalesOrder, SalesOrderCommand, SalesOrderId};
use lotflow_shipping::{ReconcileOrderLine, ShipmentCommand};

use super::allocation::apply_preview;
use super::ledger::Draft;
use super::lots::transfer_pair;
use super::{InventoryEngine, found, locked_lot, require_route};
use crate::error::EngineResult;
use crate::store::{InventoryStore, StoreTx};

/// Quantity of one product actually handed to the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredLine {
    pub product_id: ProductId,
    pub delivered: i64,
}

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Reconcile the reported delivery of `order_id`.
    ///
    /// Every line is checked against the order before any stock moves. The
    /// delivered units are sold from the order's own buffer lots (one lot that
    /// covers them when possible, FIFO otherwise); whatever is left in those
    /// lots goes back to the open tara warehouse of the route that carried
    /// it. Lines not mentioned are left untouched.
    pub fn reconcile_delivery(
        &self,
        order_id: SalesOrderId,
        lines: Vec<DeliveredLine>,
        actor: ActorId,
    ) -> EngineResult<SalesOrder> {
        if lines.is_empty() {
            return Err(DomainError::validation("delivery needs at least one line").into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = lines.iter().find(|l| !seen.insert(l.product_id)) {
            return Err(DomainError::validation(format!(
                "product {} reported more than once",
                dup.product_id
            ))
            .into());
        }
        let buffer = self.config.embark_buffer_warehouse;

        self.transact("reconcile_delivery", |tx, outbox| {
            let mut order = found(tx.lock_order(order_id)?, || format!("sales order {order_id}"))?;
            let now = Utc::now();

            let commands: Vec<SalesOrderCommand> = lines
                .iter()
                .map(|line| {
                    SalesOrderCommand::RecordDelivery(RecordDelivery {
                        order_id,
                        product_id: line.product_id,
                        delivered: line.delivered,
                        occurred_at: now,
                    })
                })
                .collect();
            for command in &commands {
                order.handle(command)?;
            }

            let mut shipments = Vec::new();
            for shipment_id in tx.shipments_for_order(order_id)? {
                shipments.push(found(tx.lock_shipment(shipment_id)?, || {
                    format!("shipment {shipment_id}")
                })?);
            }

            let mut sale = Draft::open(
                NewMovement {
                    kind: MovementKind::Sale,
                    source_warehouse: buffer,
                    destination_warehouse: None,
                    reference: Some(format!("order {order_id}")),
                    note: None,
                },
                actor,
                now,
            )?;
            let mut returns: BTreeMap<WarehouseId, (Draft, Draft)> = BTreeMap::new();
            let mut shipment_events = Vec::new();

            let mut sorted = lines.clone();
            sorted.sort_by_key(|l| l.product_id);
            for line in &sorted {
                // Buffer lots of this line, tagged with the tara warehouse of
                // the route that carried them.
                let mut carried: BTreeMap<LotId, WarehouseId> = BTreeMap::new();
                for shipment in &shipments {
                    let buffer_lots = shipment.buffer_lots_for(order_id, line.product_id);
                    if buffer_lots.is_empty() {
                        continue;
                    }
                    let tara = require_route(tx, shipment.route_id())?.open_tara_warehouse;
                    carried.extend(buffer_lots.into_iter().map(|lot_id| (lot_id, tara)));
                }

                let mut candidates: Vec<Lot> = Vec::with_capacity(carried.len());
                for lot_id in carried.keys() {
                    let lot = locked_lot(tx, *lot_id)?;
                    if lot.holds(line.product_id, buffer) && lot.is_available() {
                        candidates.push(lot);
                    }
                }

                if line.delivered > 0 {
                    let preview =
                        allocate_single_or_fifo(line.product_id, buffer, line.delivered, &candidates)?
                            .require_complete()?;
                    apply_preview(tx, &preview, &mut sale)?;
                }

                for lot_id in candidates.iter().map(Lot::id_typed) {
                    let mut lot = locked_lot(tx, lot_id)?;
                    if lot.quantity() == 0 {
                        continue;
                    }
                    let tara = carried.get(&lot_id).copied().ok_or_else(|| {
                        DomainError::invariant(format!("buffer lot {lot_id} has no route"))
                    })?;
                    let (outbound, inbound) = match returns.entry(tara) {
                        Entry::Occupied(e) => e.into_mut(),
                        Entry::Vacant(e) => e.insert(transfer_pair(
                            buffer,
                            tara,
                            Some(format!("order {order_id}")),
                            Some("undelivered remainder".to_string()),
                            actor,
                            now,
                        )?),
                    };
                    let quantity = lot.quantity();
                    outbound.record(&lot, quantity)?;
                    lot.relocate(tara)?;
                    inbound.record(&lot, quantity)?;
                    tx.update_lot(lot)?;
                }

                for shipment in shipments
                    .iter_mut()
                    .filter(|s| !s.buffer_lots_for(order_id, line.product_id).is_empty())
                {
                    let events = shipment.execute(&ShipmentCommand::ReconcileOrderLine(ReconcileOrderLine {
                        shipment_id: shipment.id_typed(),
                        order_id,
                        product_id: line.product_id,
                        occurred_at: now,
                    }))?;
                    shipment_events.push((shipment.id_typed(), events));
                }
            }

            let mut order_events = Vec::new();
            for command in &commands {
                order_events.extend(order.execute(command)?);
            }

            let sold = if sale.is_empty() {
                0
            } else {
                let (_, sale_lines) = sale.finish(tx)?;
                sale_lines.iter().map(|l| l.quantity).sum()
            };
            let mut returned = 0;
            for (outbound, inbound) in returns.into_values() {
                let (_, out_lines) = outbound.finish(tx)?;
                inbound.finish(tx)?;
                returned += out_lines.iter().map(|l| l.quantity).sum::<i64>();
            }

            tx.save_order(order.clone())?;
            outbox.record(actor, order_id.0, "sales_order", &order_events);
            for shipment in shipments {
                tx.save_shipment(shipment)?;
            }
            for (shipment_id, events) in &shipment_events {
                outbox.record(actor, shipment_id.0, "shipment", events);
            }

            info!(
                %order_id,
                lines = lines.len(),
                sold,
                returned,
                status = ?order.status(),
                "delivery reconciled"
            );
            Ok(order)
        })
    }
}
