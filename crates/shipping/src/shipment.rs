use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotflow_core::{ActorId, Aggregate, AggregateRoot, DomainError, ProductId, RouteId, WarehouseId};
use lotflow_events::Event;
use lotflow_inventory::{LotId, MovementId};
use lotflow_sales::SalesOrderId;

lotflow_core::aggregate_id!(
    /// Shipment (embarque) identifier.
    ShipmentId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipmentPhase {
    /// Stock sits in the embark buffer, deliveries outstanding.
    Loaded,
    /// Every order-bound line has been reconciled.
    Closed,
}

/// OUT (origin → buffer) and IN (buffer) movements written together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPair {
    pub outbound: MovementId,
    pub inbound: MovementId,
}

/// Which lot went where: the origin lot, the lot now holding the units in
/// the buffer, how many, and the unit cost at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLotLine {
    pub source_lot: LotId,
    pub buffer_lot: LotId,
    pub quantity: i64,
    pub unit_cost: i64,
}

/// One product loaded for one order line, or as tara when `order_id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentProductLine {
    pub product_id: ProductId,
    pub order_id: Option<SalesOrderId>,
    pub line_no: Option<u32>,
    /// Quantity asked for in this shipment.
    pub requested: i64,
    /// Quantity actually loaded (cantidad logística).
    pub loaded: i64,
    /// Order-line price at load time.
    pub unit_price: Option<i64>,
    /// Order line fully loaded once this shipment is counted.
    pub complete: bool,
    pub reconciled: bool,
    pub lots: Vec<ShipmentLotLine>,
}

impl ShipmentProductLine {
    pub fn is_order_bound(&self) -> bool {
        self.order_id.is_some()
    }

    pub fn serves(&self, order_id: SalesOrderId, product_id: ProductId) -> bool {
        self.order_id == Some(order_id) && self.product_id == product_id
    }
}

/// Aggregate root: Shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    id: ShipmentId,
    route_id: RouteId,
    encargado: ActorId,
    origin_warehouse: WarehouseId,
    buffer_warehouse: WarehouseId,
    phase: ShipmentPhase,
    lines: Vec<ShipmentProductLine>,
    tara_movements: Option<MovementPair>,
    order_movements: Option<MovementPair>,
    assembled_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Shipment {
    /// Create an empty, not-yet-assembled aggregate instance.
    pub fn empty(id: ShipmentId) -> Self {
        Self {
            id,
            route_id: RouteId::from_uuid(Default::default()),
            encargado: ActorId::from_uuid(Default::default()),
            origin_warehouse: WarehouseId::from_uuid(Default::default()),
            buffer_warehouse: WarehouseId::from_uuid(Default::default()),
            phase: ShipmentPhase::Loaded,
            lines: Vec::new(),
            tara_movements: None,
            order_movements: None,
            assembled_at: None,
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ShipmentId {
        self.id
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn encargado(&self) -> ActorId {
        self.encargado
    }

    pub fn origin_warehouse(&self) -> WarehouseId {
        self.origin_warehouse
    }

    pub fn buffer_warehouse(&self) -> WarehouseId {
        self.buffer_warehouse
    }

    pub fn phase(&self) -> ShipmentPhase {
        self.phase
    }

    pub fn lines(&self) -> &[ShipmentProductLine] {
        &self.lines
    }

    pub fn tara_movements(&self) -> Option<MovementPair> {
        self.tara_movements
    }

    pub fn order_movements(&self) -> Option<MovementPair> {
        self.order_movements
    }

    pub fn assembled_at(&self) -> Option<DateTime<Utc>> {
        self.assembled_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn carries_order(&self, order_id: SalesOrderId) -> bool {
        self.lines.iter().any(|l| l.order_id == Some(order_id))
    }

    /// Buffer lots loaded for (`order_id`, `product_id`) on this shipment.
    pub fn buffer_lots_for(&self, order_id: SalesOrderId, product_id: ProductId) -> Vec<LotId> {
        self.lines
            .iter()
            .filter(|l| l.serves(order_id, product_id))
            .flat_map(|l| l.lots.iter().map(|lot| lot.buffer_lot))
            .collect()
    }

    fn all_order_lines_reconciled(&self) -> bool {
        self.lines
            .iter()
            .filter(|l| l.is_order_bound())
            .all(|l| l.reconciled)
    }
}

impl AggregateRoot for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AssembleShipment (stock already moved by the caller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembleShipment {
    pub shipment_id: ShipmentId,
    pub route_id: RouteId,
    pub encargado: ActorId,
    pub origin_warehouse: WarehouseId,
    pub buffer_warehouse: WarehouseId,
    pub lines: Vec<ShipmentProductLine>,
    pub tara_movements: Option<MovementPair>,
    pub order_movements: Option<MovementPair>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReconcileOrderLine (delivery reported for one order line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOrderLine {
    pub shipment_id: ShipmentId,
    pub order_id: SalesOrderId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    AssembleShipment(AssembleShipment),
    ReconcileOrderLine(ReconcileOrderLine),
}

/// Event: ShipmentAssembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentAssembled {
    pub shipment_id: ShipmentId,
    pub route_id: RouteId,
    pub encargado: ActorId,
    pub origin_warehouse: WarehouseId,
    pub buffer_warehouse: WarehouseId,
    pub lines: Vec<ShipmentProductLine>,
    pub tara_movements: Option<MovementPair>,
    pub order_movements: Option<MovementPair>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineReconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReconciled {
    pub shipment_id: ShipmentId,
    pub order_id: SalesOrderId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentClosed {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentEvent {
    ShipmentAssembled(ShipmentAssembled),
    LineReconciled(LineReconciled),
    ShipmentClosed(ShipmentClosed),
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ShipmentAssembled(_) => "shipment.assembled",
            ShipmentEvent::LineReconciled(_) => "shipment.line_reconciled",
            ShipmentEvent::ShipmentClosed(_) => "shipment.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::ShipmentAssembled(e) => e.occurred_at,
            ShipmentEvent::LineReconciled(e) => e.occurred_at,
            ShipmentEvent::ShipmentClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Shipment {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShipmentEvent::ShipmentAssembled(e) => {
                self.id = e.shipment_id;
                self.route_id = e.route_id;
                self.encargado = e.encargado;
                self.origin_warehouse = e.origin_warehouse;
                self.buffer_warehouse = e.buffer_warehouse;
                self.lines = e.lines.clone();
                self.tara_movements = e.tara_movements;
                self.order_movements = e.order_movements;
                self.assembled_at = Some(e.occurred_at);
                self.phase = ShipmentPhase::Loaded;
                self.created = true;
            }
            ShipmentEvent::LineReconciled(e) => {
                for line in self
                    .lines
                    .iter_mut()
                    .filter(|l| l.serves(e.order_id, e.product_id))
                {
                    line.reconciled = true;
                }
            }
            ShipmentEvent::ShipmentClosed(e) => {
                self.phase = ShipmentPhase::Closed;
                self.closed_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::AssembleShipment(cmd) => self.handle_assemble(cmd),
            ShipmentCommand::ReconcileOrderLine(cmd) => self.handle_reconcile(cmd),
        }
    }
}

impl Shipment {
    fn handle_assemble(&self, cmd: &AssembleShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("shipment already exists"));
        }
        if cmd.origin_warehouse == cmd.buffer_warehouse {
            return Err(DomainError::validation(
                "origin warehouse must differ from the embark buffer",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("shipment needs at least one line"));
        }
        for line in &cmd.lines {
            let lot_total: i64 = line.lots.iter().map(|l| l.quantity).sum();
            if line.loaded <= 0 || lot_total != line.loaded {
                return Err(DomainError::invariant(format!(
                    "shipment line for product {} loads {} but its lots carry {}",
                    line.product_id, line.loaded, lot_total
                )));
            }
        }

        Ok(vec![ShipmentEvent::ShipmentAssembled(ShipmentAssembled {
            shipment_id: cmd.shipment_id,
            route_id: cmd.route_id,
            encargado: cmd.encargado,
            origin_warehouse: cmd.origin_warehouse,
            buffer_warehouse: cmd.buffer_warehouse,
            lines: cmd.lines.clone(),
            tara_movements: cmd.tara_movements,
            order_movements: cmd.order_movements,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reconcile(&self, cmd: &ReconcileOrderLine) -> Result<Vec<ShipmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("shipment {}", self.id)));
        }
        if self.phase == ShipmentPhase::Closed {
            return Err(DomainError::invalid_transition("shipment", self.phase, "reconcile"));
        }

        let matching: Vec<&ShipmentProductLine> = self
            .lines
            .iter()
            .filter(|l| l.serves(cmd.order_id, cmd.product_id))
            .collect();
        if matching.is_empty() {
            return Err(DomainError::not_found(format!(
                "shipment {} line for order {} product {}",
                self.id, cmd.order_id, cmd.product_id
            )));
        }
        if matching.iter().all(|l| l.reconciled) {
            return Err(DomainError::invalid_transition(
                "shipment line",
                "reconciled",
                "reconcile",
            ));
        }

        let mut events = vec![ShipmentEvent::LineReconciled(LineReconciled {
            shipment_id: self.id,
            order_id: cmd.order_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })];

        let closes = self
            .lines
            .iter()
            .filter(|l| l.is_order_bound() && !l.serves(cmd.order_id, cmd.product_id))
            .all(|l| l.reconciled);
        if closes {
            events.push(ShipmentEvent::ShipmentClosed(ShipmentClosed {
                shipment_id: self.id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }
}
