use std::sync::Arc;

use lotflow_core::{ProductId, RouteId, WarehouseId};
use lotflow_incidents::{Incident, IncidentId, IncidentLineId};
use lotflow_inventory::{Lot, LotId, Movement, MovementId, MovementLine, Product, Route, Warehouse};
use lotflow_sales::{SalesOrder, SalesOrderId};
use lotflow_shipping::{Shipment, ShipmentId};
use lotflow_transfers::{TransferId, TransferRequest};

use crate::error::StoreResult;

/// Transactional inventory store.
///
/// Snapshot reads never lock and only see committed state. Every read-then-
/// write sequence goes through a [`StoreTx`] obtained from `begin()`.
///
/// ## Locking contract
///
/// - `lock_*` reads take the row lock first, then read the row.
/// - Writing an existing lot, movement, transfer, order, shipment or incident
///   requires its row lock (`StoreError::NotLocked` otherwise). Rows created in
///   the transaction are locked implicitly.
/// - Lock waits are bounded by the store's configured timeout.
/// - Dropping a transaction without `commit()` discards its writes and
///   releases its locks.
pub trait InventoryStore: Send + Sync {
    type Tx: StoreTx;

    fn begin(&self) -> StoreResult<Self::Tx>;

    fn product(&self, id: ProductId) -> StoreResult<Option<Product>>;
    fn warehouse(&self, id: WarehouseId) -> StoreResult<Option<Warehouse>>;
    fn route(&self, id: RouteId) -> StoreResult<Option<Route>>;

    fn lot(&self, id: LotId) -> StoreResult<Option<Lot>>;
    /// Every lot ever recorded, in lot-id order.
    fn lots(&self) -> StoreResult<Vec<Lot>>;

    fn movement(&self, id: MovementId) -> StoreResult<Option<Movement>>;
    fn movement_lines(&self, id: MovementId) -> StoreResult<Vec<MovementLine>>;
    fn movements(&self) -> StoreResult<Vec<Movement>>;

    fn transfer(&self, id: TransferId) -> StoreResult<Option<TransferRequest>>;
    fn order(&self, id: SalesOrderId) -> StoreResult<Option<SalesOrder>>;
    fn shipment(&self, id: ShipmentId) -> StoreResult<Option<Shipment>>;
    fn incident(&self, id: IncidentId) -> StoreResult<Option<Incident>>;
    fn incidents(&self) -> StoreResult<Vec<Incident>>;
}

/// One unit of work against the store.
pub trait StoreTx {
    fn product(&self, id: ProductId) -> StoreResult<Option<Product>>;
    fn warehouse(&self, id: WarehouseId) -> StoreResult<Option<Warehouse>>;
    fn route(&self, id: RouteId) -> StoreResult<Option<Route>>;
    fn insert_product(&mut self, product: Product) -> StoreResult<()>;
    fn insert_warehouse(&mut self, warehouse: Warehouse) -> StoreResult<()>;
    fn insert_route(&mut self, route: Route) -> StoreResult<()>;

    fn lock_lot(&mut self, id: LotId) -> StoreResult<Option<Lot>>;
    /// Lock every lot of `product_id` in `warehouse_id`, ascending lot id,
    /// then return the ones still there after locking.
    fn lock_lots_for(&mut self, product_id: ProductId, warehouse_id: WarehouseId)
    -> StoreResult<Vec<Lot>>;
    fn insert_lot(&mut self, lot: Lot) -> StoreResult<()>;
    fn update_lot(&mut self, lot: Lot) -> StoreResult<()>;

    fn lock_movement(&mut self, id: MovementId) -> StoreResult<Option<Movement>>;
    fn movement_lines(&self, id: MovementId) -> StoreResult<Vec<MovementLine>>;
    /// The compensating movement recorded against `id`, if any.
    fn reversal_of(&self, id: MovementId) -> StoreResult<Option<MovementId>>;
    fn insert_movement(&mut self, movement: Movement, lines: Vec<MovementLine>) -> StoreResult<()>;
    fn update_movement(&mut self, movement: Movement) -> StoreResult<()>;
    fn append_movement_line(&mut self, line: MovementLine) -> StoreResult<()>;

    fn lock_transfer(&mut self, id: TransferId) -> StoreResult<Option<TransferRequest>>;
    fn save_transfer(&mut self, transfer: TransferRequest) -> StoreResult<()>;

    fn lock_order(&mut self, id: SalesOrderId) -> StoreResult<Option<SalesOrder>>;
    fn save_order(&mut self, order: SalesOrder) -> StoreResult<()>;

    fn lock_shipment(&mut self, id: ShipmentId) -> StoreResult<Option<Shipment>>;
    fn save_shipment(&mut self, shipment: Shipment) -> StoreResult<()>;
    /// Shipments carrying lines of `order_id`, ascending id.
    fn shipments_for_order(&self, order_id: SalesOrderId) -> StoreResult<Vec<ShipmentId>>;

    fn lock_incident(&mut self, id: IncidentId) -> StoreResult<Option<Incident>>;
    fn save_incident(&mut self, incident: Incident) -> StoreResult<()>;
    fn incident_for_line(&self, line_id: IncidentLineId) -> StoreResult<Option<IncidentId>>;

    /// Apply every staged write atomically and release the locks.
    fn commit(self) -> StoreResult<()>
    where
        Self: Sized;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    type Tx = S::Tx;

    fn begin(&self) -> StoreResult<Self::Tx> {
        (**self).begin()
    }

    fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        (**self).product(id)
    }

    fn warehouse(&self, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        (**self).warehouse(id)
    }

    fn route(&self, id: RouteId) -> StoreResult<Option<Route>> {
        (**self).route(id)
    }

    fn lot(&self, id: LotId) -> StoreResult<Option<Lot>> {
        (**self).lot(id)
    }

    fn lots(&self) -> StoreResult<Vec<Lot>> {
        (**self).lots()
    }

    fn movement(&self, id: MovementId) -> StoreResult<Option<Movement>> {
        (**self).movement(id)
    }

    fn movement_lines(&self, id: MovementId) -> StoreResult<Vec<MovementLine>> {
        (**self).movement_lines(id)
    }

    fn movements(&self) -> StoreResult<Vec<Movement>> {
        (**self).movements()
    }

    fn transfer(&self, id: TransferId) -> StoreResult<Option<TransferRequest>> {
        (**self).transfer(id)
    }

    fn order(&self, id: SalesOrderId) -> StoreResult<Option<SalesOrder>> {
        (**self).order(id)
    }

    fn shipment(&self, id: ShipmentId) -> StoreResult<Option<Shipment>> {
        (**self).shipment(id)
    }

    fn incident(&self, id: IncidentId) -> StoreResult<Option<Incident>> {
        (**self).incident(id)
    }

    fn incidents(&self) -> StoreResult<Vec<Incident>> {
        (**self).incidents()
    }
}
