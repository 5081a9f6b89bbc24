//! Seed data and scripted engine operations for `lotflow run`.
//!
//! A script is a JSON array of steps. Each step names an operation in `op`
//! and carries its arguments inline:
//!
//! ```json
//! [
//!   { "op": "allocate_fifo", "product_id": "…", "warehouse_id": "…", "quantity": 12 },
//!   { "op": "approve_transfer", "transfer_id": "…", "actor": "…" }
//! ]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use lotflow_core::{ActorId, ProductId, WarehouseId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_incidents::IncidentLineId;
use lotflow_infra::{
    AssembleShipmentInput, DeliveredLine, EngineError, EngineResult, IncidentLineInput,
    InventoryEngine, InventoryStore, ReceiveStock, TransferRequestInput,
};
use lotflow_inventory::{
    LotId, MovementId, MovementKind, NewLot, NewMovement, Product, Route, Warehouse,
};
use lotflow_sales::{NewOrderLine, SalesOrderId};
use lotflow_transfers::TransferId;

/// Reference data and opening stock loaded before the script runs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub products: Vec<Product>,
    pub warehouses: Vec<Warehouse>,
    pub routes: Vec<Route>,
    pub orders: Vec<SeedOrder>,
    pub lots: Vec<NewLot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedOrder {
    pub order_id: SalesOrderId,
    #[serde(default)]
    pub customer_ref: Option<String>,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub products: usize,
    pub warehouses: usize,
    pub routes: usize,
    pub orders: usize,
    pub lots: usize,
}

/// Register everything in `seed`, in dependency order.
pub fn apply_seed<S, B>(
    engine: &InventoryEngine<S, B>,
    seed: Seed,
    actor: ActorId,
) -> EngineResult<SeedSummary>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let mut summary = SeedSummary::default();
    for product in seed.products {
        engine.register_product(product)?;
        summary.products += 1;
    }
    for warehouse in seed.warehouses {
        engine.register_warehouse(warehouse)?;
        summary.warehouses += 1;
    }
    for route in seed.routes {
        engine.register_route(route)?;
        summary.routes += 1;
    }
    for order in seed.orders {
        engine.register_order(order.order_id, order.customer_ref, order.lines, actor)?;
        summary.orders += 1;
    }
    for lot in seed.lots {
        engine.create_lot(lot, actor)?;
        summary.lots += 1;
    }
    info!(
        products = summary.products,
        warehouses = summary.warehouses,
        routes = summary.routes,
        orders = summary.orders,
        lots = summary.lots,
        "seed applied"
    );
    Ok(summary)
}

fn sale() -> MovementKind {
    MovementKind::Sale
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateLot {
        lot: NewLot,
    },
    ReceiveStock(ReceiveStock),
    AdjustLot {
        lot_id: LotId,
        delta: i64,
        #[serde(default)]
        note: Option<String>,
    },
    RelocateLot {
        lot_id: LotId,
        destination: WarehouseId,
        #[serde(default)]
        note: Option<String>,
    },
    SplitLot {
        lot_id: LotId,
        quantity: i64,
    },
    RetireLot {
        lot_id: LotId,
    },
    StockOnHand {
        product_id: ProductId,
        warehouse_id: WarehouseId,
    },
    AllocateFifo {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
    },
    /// Preview and commit in one step.
    CommitAllocation {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        #[serde(default = "sale")]
        kind: MovementKind,
        #[serde(default)]
        note: Option<String>,
    },
    CreateMovement(NewMovement),
    AddMovementLine {
        movement_id: MovementId,
        product_id: ProductId,
        lot_id: LotId,
        quantity: i64,
    },
    TerminateMovement {
        movement_id: MovementId,
    },
    ReverseMovement {
        movement_id: MovementId,
        #[serde(default)]
        note: Option<String>,
    },
    RequestTransfer(TransferRequestInput),
    ApproveTransfer {
        transfer_id: TransferId,
        #[serde(default)]
        note: Option<String>,
    },
    RejectTransfer {
        transfer_id: TransferId,
        #[serde(default)]
        note: Option<String>,
    },
    AssembleShipment(AssembleShipmentInput),
    ReconcileDelivery {
        order_id: SalesOrderId,
        lines: Vec<DeliveredLine>,
    },
    ReportIncident {
        description: String,
        lines: Vec<IncidentLineInput>,
    },
    AttendIncidentLine {
        line_id: IncidentLineId,
        #[serde(default)]
        note: Option<String>,
    },
    OpenIncidents,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateLot { .. } => "create_lot",
            Operation::ReceiveStock(_) => "receive_stock",
            Operation::AdjustLot { .. } => "adjust_lot",
            Operation::RelocateLot { .. } => "relocate_lot",
            Operation::SplitLot { .. } => "split_lot",
            Operation::RetireLot { .. } => "retire_lot",
            Operation::StockOnHand { .. } => "stock_on_hand",
            Operation::AllocateFifo { .. } => "allocate_fifo",
            Operation::CommitAllocation { .. } => "commit_allocation",
            Operation::CreateMovement(_) => "create_movement",
            Operation::AddMovementLine { .. } => "add_movement_line",
            Operation::TerminateMovement { .. } => "terminate_movement",
            Operation::ReverseMovement { .. } => "reverse_movement",
            Operation::RequestTransfer(_) => "request_transfer",
            Operation::ApproveTransfer { .. } => "approve_transfer",
            Operation::RejectTransfer { .. } => "reject_transfer",
            Operation::AssembleShipment(_) => "assemble_shipment",
            Operation::ReconcileDelivery { .. } => "reconcile_delivery",
            Operation::ReportIncident { .. } => "report_incident",
            Operation::AttendIncidentLine { .. } => "attend_incident_line",
            Operation::OpenIncidents => "open_incidents",
        }
    }
}

/// One scripted operation and the actor performing it.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Falls back to the run's default actor.
    #[serde(default)]
    pub actor: Option<ActorId>,
    #[serde(flatten)]
    pub operation: Operation,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("cannot encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StepError {
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Engine(err) => err.kind(),
            StepError::Encode(_) => "encode",
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, StepError> {
    Ok(serde_json::to_value(value)?)
}

/// Run one operation against `engine`.
pub fn apply<S, B>(
    engine: &InventoryEngine<S, B>,
    operation: Operation,
    actor: ActorId,
) -> Result<JsonValue, StepError>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    match operation {
        Operation::CreateLot { lot } => to_json(&engine.create_lot(lot, actor)?),
        Operation::ReceiveStock(receipt) => to_json(&engine.receive_stock(receipt, actor)?),
        Operation::AdjustLot {
            lot_id,
            delta,
            note,
        } => to_json(&engine.adjust_lot_quantity(lot_id, delta, actor, note)?),
        Operation::RelocateLot {
            lot_id,
            destination,
            note,
        } => to_json(&engine.relocate_lot(lot_id, destination, actor, note)?),
        Operation::SplitLot { lot_id, quantity } => {
            to_json(&engine.split_lot(lot_id, quantity, actor)?)
        }
        Operation::RetireLot { lot_id } => to_json(&engine.retire_lot(lot_id, actor)?),
        Operation::StockOnHand {
            product_id,
            warehouse_id,
        } => to_json(&engine.stock_on_hand(product_id, warehouse_id)?),
        Operation::AllocateFifo {
            product_id,
            warehouse_id,
            quantity,
        } => to_json(&engine.allocate_fifo(product_id, warehouse_id, quantity)?),
        Operation::CommitAllocation {
            product_id,
            warehouse_id,
            quantity,
            kind,
            note,
        } => {
            let preview = engine.allocate_fifo(product_id, warehouse_id, quantity)?;
            to_json(&engine.commit_allocation(&preview, kind, actor, note)?)
        }
        Operation::CreateMovement(new) => to_json(&engine.create_movement(new, actor)?),
        Operation::AddMovementLine {
            movement_id,
            product_id,
            lot_id,
            quantity,
        } => to_json(&engine.add_movement_line(movement_id, product_id, lot_id, quantity)?),
        Operation::TerminateMovement { movement_id } => {
            to_json(&engine.terminate_movement(movement_id)?)
        }
        Operation::ReverseMovement { movement_id, note } => {
            to_json(&engine.reverse_movement(movement_id, actor, note)?)
        }
        Operation::RequestTransfer(input) => to_json(&engine.request_transfer(input, actor)?),
        Operation::ApproveTransfer { transfer_id, note } => {
            to_json(&engine.approve_transfer(transfer_id, actor, note)?)
        }
        Operation::RejectTransfer { transfer_id, note } => {
            to_json(&engine.reject_transfer(transfer_id, actor, note)?)
        }
        Operation::AssembleShipment(input) => to_json(&engine.assemble_shipment(input, actor)?),
        Operation::ReconcileDelivery { order_id, lines } => {
            to_json(&engine.reconcile_delivery(order_id, lines, actor)?)
        }
        Operation::ReportIncident { description, lines } => {
            to_json(&engine.report_incident(description, lines, actor)?)
        }
        Operation::AttendIncidentLine { line_id, note } => {
            to_json(&engine.attend_incident_line(line_id, note, actor)?)
        }
        Operation::OpenIncidents => to_json(&engine.open_incidents()?),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
}

/// What `lotflow run` prints for each step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub step: usize,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    /// Notification types published by this step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

/// Run `step` and describe the outcome. Notifications are attached by the
/// caller.
pub fn execute<S, B>(
    engine: &InventoryEngine<S, B>,
    index: usize,
    step: Step,
    default_actor: ActorId,
) -> Report
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let op = step.operation.name();
    let actor = step.actor.unwrap_or(default_actor);
    match apply(engine, step.operation, actor) {
        Ok(result) => Report {
            step: index,
            op,
            ok: true,
            result: Some(result),
            error: None,
            events: Vec::new(),
        },
        Err(err) => Report {
            step: index,
            op,
            ok: false,
            result: None,
            error: Some(ErrorReport {
                kind: err.kind(),
                message: err.to_string(),
            }),
            events: Vec::new(),
        },
    }
}
