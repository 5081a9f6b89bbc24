use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ProductId};
use lotflow_events::Event;

lotflow_core::aggregate_id!(
    /// Sales order identifier.
    SalesOrderId
);

/// Sales order status, derived from its lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalesOrderStatus {
    /// Not every line is fully loaded yet.
    Open,
    /// Every line fully loaded onto shipments.
    Loaded,
    /// At least one line reconciled, not all delivered in full.
    PartiallyDelivered,
    Delivered,
}

/// Order line: product, quantity, unit price, plus logistics progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: i64,
    /// Quantity actually loaded onto shipments so far (cantidad logística).
    pub loaded_quantity: i64,
    /// Quantity reported delivered; `None` until the line is reconciled.
    pub delivered_quantity: Option<i64>,
    /// True only when the full ordered quantity was delivered.
    pub delivered: bool,
}

impl OrderLine {
    pub fn is_fully_loaded(&self) -> bool {
        self.loaded_quantity == self.quantity
    }

    pub fn is_reconciled(&self) -> bool {
        self.delivered_quantity.is_some()
    }

    pub fn pending_load(&self) -> i64 {
        self.quantity - self.loaded_quantity
    }
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    id: SalesOrderId,
    customer_ref: Option<String>,
    status: SalesOrderStatus,
    lines: Vec<OrderLine>,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            customer_ref: None,
            status: SalesOrderStatus::Open,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn customer_ref(&self) -> Option<&str> {
        self.customer_ref.as_deref()
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line_for(&self, product_id: ProductId) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    pub fn is_fully_loaded(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(OrderLine::is_fully_loaded)
    }

    pub fn is_fully_delivered(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|l| l.delivered)
    }

    fn derive_status(&self) -> SalesOrderStatus {
        if self.is_fully_delivered() {
            SalesOrderStatus::Delivered
        } else if self.lines.iter().any(OrderLine::is_reconciled) {
            SalesOrderStatus::PartiallyDelivered
        } else if self.is_fully_loaded() {
            SalesOrderStatus::Loaded
        } else {
            SalesOrderStatus::Open
        }
    }

    fn line_mut(&mut self, line_no: u32) -> Option<&mut OrderLine> {
        self.lines.iter_mut().find(|l| l.line_no == line_no)
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub order_id: SalesOrderId,
    pub customer_ref: Option<String>,
    pub lines: Vec<NewOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordLoading (quantity put on a shipment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLoading {
    pub order_id: SalesOrderId,
    pub shipment_id: AggregateId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDelivery (quantity handed to the customer on route).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDelivery {
    pub order_id: SalesOrderId,
    pub product_id: ProductId,
    pub delivered: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    RecordLoading(RecordLoading),
    RecordDelivery(RecordDelivery),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub order_id: SalesOrderId,
    pub customer_ref: Option<String>,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineLoaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineLoaded {
    pub order_id: SalesOrderId,
    pub shipment_id: AggregateId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelivered {
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub delivered: i64,
    pub complete: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    LineLoaded(LineLoaded),
    LineDelivered(LineDelivered),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => "sales.order.created",
            SalesOrderEvent::LineLoaded(_) => "sales.order.line_loaded",
            SalesOrderEvent::LineDelivered(_) => "sales.order.line_delivered",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::LineLoaded(e) => e.occurred_at,
            SalesOrderEvent::LineDelivered(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.customer_ref = e.customer_ref.clone();
                self.lines = e.lines.clone();
                self.created = true;
            }
            SalesOrderEvent::LineLoaded(e) => {
                if let Some(line) = self.line_mut(e.line_no) {
                    line.loaded_quantity += e.quantity;
                }
            }
            SalesOrderEvent::LineDelivered(e) => {
                if let Some(line) = self.line_mut(e.line_no) {
                    line.delivered_quantity = Some(e.delivered);
                    line.delivered = e.complete;
                }
            }
        }

        self.status = self.derive_status();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::RecordLoading(cmd) => self.handle_record_loading(cmd),
            SalesOrderCommand::RecordDelivery(cmd) => self.handle_record_delivery(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("sales order {}", self.id)));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn existing_line(&self, product_id: ProductId) -> Result<&OrderLine, DomainError> {
        self.line_for(product_id).ok_or_else(|| {
            DomainError::validation(format!("order {} has no line for product {}", self.id, product_id))
        })
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("sales order needs at least one line"));
        }

        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(cmd.lines.len());
        for (idx, line) in cmd.lines.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if line.unit_price < 0 {
                return Err(DomainError::validation("unit_price cannot be negative"));
            }
            if !seen.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} appears on more than one line",
                    line.product_id
                )));
            }
            lines.push(OrderLine {
                line_no: idx as u32 + 1,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                loaded_quantity: 0,
                delivered_quantity: None,
                delivered: false,
            });
        }

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            order_id: cmd.order_id,
            customer_ref: cmd.customer_ref.clone(),
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_loading(&self, cmd: &RecordLoading) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        let line = self.existing_line(cmd.product_id)?;
        if line.is_reconciled() {
            return Err(DomainError::invalid_transition("order line", "Reconciled", "load"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("loaded quantity must be positive"));
        }
        if cmd.quantity > line.pending_load() {
            return Err(DomainError::validation(format!(
                "cannot load {} of product {}: only {} left to load on order {}",
                cmd.quantity,
                cmd.product_id,
                line.pending_load(),
                self.id
            )));
        }

        Ok(vec![SalesOrderEvent::LineLoaded(LineLoaded {
            order_id: cmd.order_id,
            shipment_id: cmd.shipment_id,
            line_no: line.line_no,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_delivery(
        &self,
        cmd: &RecordDelivery,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        let line = self.existing_line(cmd.product_id)?;
        if line.is_reconciled() {
            return Err(DomainError::invalid_transition("order line", "Reconciled", "reconcile"));
        }
        if cmd.delivered < 0 {
            return Err(DomainError::validation("delivered quantity cannot be negative"));
        }
        if cmd.delivered > line.quantity {
            return Err(DomainError::validation(format!(
                "delivered {} exceeds ordered {} for product {}",
                cmd.delivered, line.quantity, cmd.product_id
            )));
        }
        if line.loaded_quantity == 0 {
            return Err(DomainError::validation(format!(
                "product {} was never loaded for order {}",
                cmd.product_id, self.id
            )));
        }
        if cmd.delivered > line.loaded_quantity {
            return Err(DomainError::validation(format!(
                "delivered {} exceeds loaded {} for product {}",
                cmd.delivered, line.loaded_quantity, cmd.product_id
            )));
        }

        Ok(vec![SalesOrderEvent::LineDelivered(LineDelivered {
            order_id: cmd.order_id,
            line_no: line.line_no,
            product_id: cmd.product_id,
            delivered: cmd.delivered,
            complete: cmd.delivered == line.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
