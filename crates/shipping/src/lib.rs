//! Shipment assembly (embarque).
//!
//! `plan` decides, without touching anything, which lots cover which order
//! lines and loose (tara) lines. The infra layer executes the plan under row
//! locks and records the result as a `Shipment` aggregate.

pub mod plan;
pub mod shipment;

pub use plan::{
    DemandLine, EmbarquePlan, EmbarqueRequest, LotMove, LotMoveKind, OrderDemand, PlannedLine,
    ShipmentTarget, plan_embarque, requested_products,
};
pub use shipment::{
    AssembleShipment, LineReconciled, MovementPair, ReconcileOrderLine, Shipment,
    ShipmentAssembled, ShipmentClosed, ShipmentCommand, ShipmentEvent, ShipmentId,
    ShipmentLotLine, ShipmentPhase, ShipmentProductLine,
};
