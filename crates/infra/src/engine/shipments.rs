//! Embarque: load order lines and tara onto a route shipment.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use lotflow_core::{ActorId, Aggregate, DomainError, RouteId, WarehouseId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_inventory::{LotId, MovementKind, NewMovement};
use lotflow_sales::{RecordLoading, SalesOrderCommand};
use lotflow_shipping::{
    AssembleShipment, DemandLine, EmbarqueRequest, LotMoveKind, MovementPair, OrderDemand,
    Shipment, ShipmentCommand, ShipmentId, ShipmentLotLine, ShipmentProductLine, ShipmentTarget,
    plan_embarque, requested_products,
};

use super::ledger::Draft;
use super::{InventoryEngine, locked_lot, require_product, require_route, require_warehouse};
use crate::error::EngineResult;
use crate::store::{InventoryStore, StoreTx};

/// What to load: order lines and loose tara stock from one origin warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembleShipmentInput {
    pub route_id: RouteId,
    pub origin_warehouse: WarehouseId,
    #[serde(default)]
    pub orders: Vec<OrderDemand>,
    #[serde(default)]
    pub tara: Vec<DemandLine>,
}

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Assemble a shipment into the embark buffer, all lines or none.
    ///
    /// Locks the orders (ascending id), then every origin lot of every
    /// requested product (ascending product id, then lot id), plans against
    /// that locked state and applies the plan. Any shortfall aborts the whole
    /// assembly with every shortfall listed.
    pub fn assemble_shipment(
        &self,
        input: AssembleShipmentInput,
        encargado: ActorId,
    ) -> EngineResult<Shipment> {
        let request = EmbarqueRequest {
            route_id: input.route_id,
            origin_warehouse: input.origin_warehouse,
            buffer_warehouse: self.config.embark_buffer_warehouse,
            orders: input.orders,
            tara: input.tara,
        };

        self.transact("assemble_shipment", |tx, outbox| {
            require_route(tx, request.route_id)?;
            require_warehouse(tx, request.origin_warehouse)?;
            require_warehouse(tx, request.buffer_warehouse)?;

            let order_ids: BTreeSet<_> = request.orders.iter().map(|o| o.order_id).collect();
            let mut orders = Vec::with_capacity(order_ids.len());
            for order_id in order_ids {
                if let Some(order) = tx.lock_order(order_id)? {
                    orders.push(order);
                }
            }

            let mut lots = Vec::new();
            for product_id in requested_products(&request) {
                require_product(tx, product_id)?;
                lots.extend(tx.lock_lots_for(product_id, request.origin_warehouse)?);
            }

            let plan = match plan_embarque(&request, &orders, &lots) {
                Ok(plan) => plan,
                Err(err) => {
                    if let DomainError::InsufficientStock(shortfalls) = &err {
                        warn!(
                            route_id = %request.route_id,
                            shortfalls = shortfalls.len(),
                            "embarque short of stock"
                        );
                    }
                    return Err(err.into());
                }
            };

            let shipment_id = ShipmentId::generate();
            let now = Utc::now();
            let movement = |kind, note: &str| NewMovement {
                kind,
                source_warehouse: request.origin_warehouse,
                destination_warehouse: Some(request.buffer_warehouse),
                reference: Some(format!("shipment {shipment_id}")),
                note: Some(note.to_string()),
            };
            let mut order_out = Draft::open(movement(MovementKind::ShipmentOut, "orders"), encargado, now)?;
            let mut order_in = Draft::open(movement(MovementKind::ShipmentIn, "orders"), encargado, now)?;
            let mut tara_out = Draft::open(movement(MovementKind::ShipmentOut, "tara"), encargado, now)?;
            let mut tara_in = Draft::open(movement(MovementKind::ShipmentIn, "tara"), encargado, now)?;

            let mut lot_lines: Vec<Vec<ShipmentLotLine>> = vec![Vec::new(); plan.lines.len()];
            for mv in &plan.moves {
                let (outbound, inbound) = match plan.lines[mv.line_index].target {
                    ShipmentTarget::Order { .. } => (&mut order_out, &mut order_in),
                    ShipmentTarget::Tara => (&mut tara_out, &mut tara_in),
                };

                let mut source = locked_lot(tx, mv.source_lot)?;
                outbound.record(&source, mv.quantity)?;
                let loaded = match mv.kind {
                    LotMoveKind::Relocate => {
                        if source.quantity() != mv.quantity {
                            return Err(DomainError::invariant(format!(
                                "lot {} holds {}, relocation planned for {}",
                                mv.source_lot,
                                source.quantity(),
                                mv.quantity
                            ))
                            .into());
                        }
                        source.relocate(request.buffer_warehouse)?;
                        tx.update_lot(source.clone())?;
                        source
                    }
                    LotMoveKind::Split => {
                        let mut split = source.split(mv.quantity, LotId::generate(), encargado, now)?;
                        split.relocate(request.buffer_warehouse)?;
                        tx.update_lot(source)?;
                        tx.insert_lot(split.clone())?;
                        split
                    }
                };
                inbound.record(&loaded, mv.quantity)?;

                lot_lines[mv.line_index].push(ShipmentLotLine {
                    source_lot: mv.source_lot,
                    buffer_lot: loaded.id_typed(),
                    quantity: mv.quantity,
                    unit_cost: loaded.unit_cost(),
                });
            }

            let mut lines = Vec::with_capacity(plan.lines.len());
            for (planned, loaded_lots) in plan.lines.iter().zip(lot_lines) {
                let (order_id, line_no, unit_price) = match planned.target {
                    ShipmentTarget::Order {
                        order_id,
                        line_no,
                        unit_price,
                    } => (Some(order_id), Some(line_no), Some(unit_price)),
                    ShipmentTarget::Tara => (None, None, None),
                };
                lines.push(ShipmentProductLine {
                    product_id: planned.product_id,
                    order_id,
                    line_no,
                    requested: planned.requested,
                    loaded: planned.allocation.covered,
                    unit_price,
                    complete: planned.complete,
                    reconciled: false,
                    lots: loaded_lots,
                });
            }

            for order in &mut orders {
                let order_id = order.id_typed();
                let mut events = Vec::new();
                for line in lines.iter().filter(|l| l.order_id == Some(order_id)) {
                    events.extend(order.execute(&SalesOrderCommand::RecordLoading(RecordLoading {
                        order_id,
                        shipment_id: shipment_id.0,
                        product_id: line.product_id,
                        quantity: line.loaded,
                        occurred_at: now,
                    }))?);
                }
                tx.save_order(order.clone())?;
                outbox.record(encargado, order_id.0, "sales_order", &events);
            }

            let order_movements = finish_pair(tx, order_out, order_in)?;
            let tara_movements = finish_pair(tx, tara_out, tara_in)?;

            let mut shipment = Shipment::empty(shipment_id);
            let events = shipment.execute(&ShipmentCommand::AssembleShipment(AssembleShipment {
                shipment_id,
                route_id: request.route_id,
                encargado,
                origin_warehouse: request.origin_warehouse,
                buffer_warehouse: request.buffer_warehouse,
                lines,
                tara_movements,
                order_movements,
                occurred_at: now,
            }))?;
            tx.save_shipment(shipment.clone())?;
            outbox.record(encargado, shipment_id.0, "shipment", &events);

            info!(
                %shipment_id,
                route_id = %request.route_id,
                lines = shipment.lines().len(),
                lot_moves = plan.moves.len(),
                orders = orders.len(),
                "shipment assembled"
            );
            Ok(shipment)
        })
    }
}

/// Stage a shipment movement pair, or nothing when it carries no lines.
fn finish_pair<T: StoreTx>(tx: &mut T, outbound: Draft, inbound: Draft) -> EngineResult<Option<MovementPair>> {
    if outbound.is_empty() {
        return Ok(None);
    }
    let ids = MovementPair {
        outbound: outbound.id(),
        inbound: inbound.id(),
    };
    outbound.finish(tx)?;
    inbound.finish(tx)?;
    Ok(Some(ids))
}
