//! Engine facade.
//!
//! Every mutating operation runs as one store transaction:
//!
//! ```text
//! begin → lock rows → read → domain decision → stage writes → commit → notify
//! ```
//!
//! Any error before `commit` drops the transaction, which discards every
//! staged write and releases the row locks. Notifications are published only
//! after a successful commit.

mod allocation;
mod delivery;
mod incidents;
mod ledger;
mod lots;
mod shipments;
mod transfers;

pub use delivery::DeliveredLine;
pub use incidents::IncidentLineInput;
pub use lots::{ReceiveStock, Receipt, SplitOutcome};
pub use shipments::AssembleShipmentInput;
pub use transfers::TransferRequestInput;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use lotflow_core::{ActorId, Aggregate, DomainError, ProductId, RouteId, WarehouseId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_incidents::{Incident, IncidentId};
use lotflow_inventory::{Lot, LotId, Movement, MovementId, MovementLine, Product, Route, Warehouse};
use lotflow_sales::{CreateSalesOrder, NewOrderLine, SalesOrder, SalesOrderCommand, SalesOrderId};
use lotflow_shipping::{Shipment, ShipmentId};
use lotflow_transfers::{TransferId, TransferRequest};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::{Notifier, Outbox};
use crate::store::{InventoryStore, StoreTx};

/// Lot-based inventory engine over a transactional store and a notification
/// bus.
pub struct InventoryEngine<S, B> {
    store: S,
    notifier: Notifier<B>,
    config: EngineConfig,
}

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, config: EngineConfig) -> Self {
        Self {
            store,
            notifier: Notifier::new(bus),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        self.notifier.bus()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `work` in a fresh transaction; commit and notify on success.
    fn transact<T, F>(&self, operation: &'static str, work: F) -> EngineResult<T>
    where
        F: FnOnce(&mut S::Tx, &mut Outbox) -> EngineResult<T>,
    {
        let mut tx = self.store.begin()?;
        let mut outbox = Outbox::new();

        match work(&mut tx, &mut outbox) {
            Ok(value) => {
                tx.commit()?;
                self.notifier.publish(outbox);
                Ok(value)
            }
            Err(err) => {
                warn!(operation, error = %err, "operation rolled back");
                Err(err)
            }
        }
    }

    // ---- reference directory -------------------------------------------------

    pub fn register_product(&self, product: Product) -> EngineResult<Product> {
        product.validate()?;
        self.transact("register_product", |tx, _| {
            tx.insert_product(product.clone())?;
            Ok(product)
        })
    }

    pub fn register_warehouse(&self, warehouse: Warehouse) -> EngineResult<Warehouse> {
        warehouse.validate()?;
        self.transact("register_warehouse", |tx, _| {
            tx.insert_warehouse(warehouse.clone())?;
            Ok(warehouse)
        })
    }

    pub fn register_route(&self, route: Route) -> EngineResult<Route> {
        route.validate()?;
        if route.open_tara_warehouse == self.config.embark_buffer_warehouse {
            return Err(DomainError::validation(
                "open tara warehouse cannot be the embark buffer",
            )
            .into());
        }
        self.transact("register_route", |tx, _| {
            require_warehouse(tx, route.open_tara_warehouse)?;
            tx.insert_route(route.clone())?;
            Ok(route)
        })
    }

    /// Record a sales order handed over by the order-management collaborator.
    pub fn register_order(
        &self,
        order_id: SalesOrderId,
        customer_ref: Option<String>,
        lines: Vec<NewOrderLine>,
        actor: ActorId,
    ) -> EngineResult<SalesOrder> {
        self.transact("register_order", |tx, outbox| {
            for line in &lines {
                require_product(tx, line.product_id)?;
            }
            let mut order = tx
                .lock_order(order_id)?
                .unwrap_or_else(|| SalesOrder::empty(order_id));
            let events = order.execute(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                order_id,
                customer_ref,
                lines,
                occurred_at: Utc::now(),
            }))?;
            tx.save_order(order.clone())?;
            outbox.record(actor, order_id.0, "sales_order", &events);
            info!(%order_id, lines = order.lines().len(), "sales order registered");
            Ok(order)
        })
    }

    // ---- queries -------------------------------------------------------------

    pub fn product(&self, id: ProductId) -> EngineResult<Product> {
        found(self.store.product(id)?, || format!("product {id}"))
    }

    pub fn warehouse(&self, id: WarehouseId) -> EngineResult<Warehouse> {
        found(self.store.warehouse(id)?, || format!("warehouse {id}"))
    }

    pub fn route(&self, id: RouteId) -> EngineResult<Route> {
        found(self.store.route(id)?, || format!("route {id}"))
    }

    pub fn lot(&self, id: LotId) -> EngineResult<Lot> {
        found(self.store.lot(id)?, || format!("lot {id}"))
    }

    pub fn movement(&self, id: MovementId) -> EngineResult<Movement> {
        found(self.store.movement(id)?, || format!("movement {id}"))
    }

    pub fn movement_lines(&self, id: MovementId) -> EngineResult<Vec<MovementLine>> {
        self.movement(id)?;
        Ok(self.store.movement_lines(id)?)
    }

    pub fn transfer(&self, id: TransferId) -> EngineResult<TransferRequest> {
        found(self.store.transfer(id)?, || format!("transfer request {id}"))
    }

    pub fn order(&self, id: SalesOrderId) -> EngineResult<SalesOrder> {
        found(self.store.order(id)?, || format!("sales order {id}"))
    }

    pub fn shipment(&self, id: ShipmentId) -> EngineResult<Shipment> {
        found(self.store.shipment(id)?, || format!("shipment {id}"))
    }

    pub fn incident(&self, id: IncidentId) -> EngineResult<Incident> {
        found(self.store.incident(id)?, || format!("incident {id}"))
    }

    /// Incidents with at least one unattended line, oldest first.
    pub fn open_incidents(&self) -> EngineResult<Vec<Incident>> {
        let mut open: Vec<Incident> = self
            .store
            .incidents()?
            .into_iter()
            .filter(|i| !i.is_resolved())
            .collect();
        open.sort_by_key(|i| (i.created_at(), i.id_typed()));
        Ok(open)
    }
}

fn found<T>(row: Option<T>, what: impl FnOnce() -> String) -> EngineResult<T> {
    row.ok_or_else(|| EngineError::Domain(DomainError::not_found(what())))
}

pub(crate) fn require_product<T: StoreTx>(tx: &T, id: ProductId) -> EngineResult<Product> {
    found(tx.product(id)?, || format!("product {id}"))
}

pub(crate) fn require_warehouse<T: StoreTx>(tx: &T, id: WarehouseId) -> EngineResult<Warehouse> {
    found(tx.warehouse(id)?, || format!("warehouse {id}"))
}

pub(crate) fn require_route<T: StoreTx>(tx: &T, id: RouteId) -> EngineResult<Route> {
    found(tx.route(id)?, || format!("route {id}"))
}

pub(crate) fn locked_lot<T: StoreTx>(tx: &mut T, id: LotId) -> EngineResult<Lot> {
    found(tx.lock_lot(id)?, || format!("lot {id}"))
}
