use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use lotflow_core::{ProductId, RouteId, WarehouseId};
use lotflow_incidents::{Incident, IncidentId, IncidentLineId};
use lotflow_inventory::{Lot, LotId, Movement, MovementId, MovementLine, Product, Route, Warehouse};
use lotflow_sales::{SalesOrder, SalesOrderId};
use lotflow_shipping::{Shipment, ShipmentId};
use lotflow_transfers::{TransferId, TransferRequest};

use super::locks::{RowKey, RowLocks};
use super::r#trait::{InventoryStore, StoreTx};
use crate::config::EngineConfig;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    warehouses: BTreeMap<WarehouseId, Warehouse>,
    routes: BTreeMap<RouteId, Route>,
    lots: BTreeMap<LotId, Lot>,
    movements: BTreeMap<MovementId, Movement>,
    movement_lines: BTreeMap<MovementId, Vec<MovementLine>>,
    transfers: BTreeMap<TransferId, TransferRequest>,
    orders: BTreeMap<SalesOrderId, SalesOrder>,
    shipments: BTreeMap<ShipmentId, Shipment>,
    incidents: BTreeMap<IncidentId, Incident>,
}

impl Tables {
    fn merge(&mut self, staged: Tables) {
        self.products.extend(staged.products);
        self.warehouses.extend(staged.warehouses);
        self.routes.extend(staged.routes);
        self.lots.extend(staged.lots);
        self.movements.extend(staged.movements);
        for (movement_id, lines) in staged.movement_lines {
            self.movement_lines.entry(movement_id).or_default().extend(lines);
        }
        self.transfers.extend(staged.transfers);
        self.orders.extend(staged.orders);
        self.shipments.extend(staged.shipments);
        self.incidents.extend(staged.incidents);
    }
}

/// A record stored in one of the tables.
trait Row: Clone {
    type Key: Ord + Copy + core::fmt::Display;

    fn key(&self) -> Self::Key;
    /// Lock key; `None` for directory rows, which are insert-only.
    fn row_key(key: Self::Key) -> Option<RowKey>;
    fn table(tables: &Tables) -> &BTreeMap<Self::Key, Self>;
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Self::Key, Self>;
}

impl Row for Product {
    type Key = ProductId;

    fn key(&self) -> ProductId {
        self.id
    }

    fn row_key(_: ProductId) -> Option<RowKey> {
        None
    }

    fn table(tables: &Tables) -> &BTreeMap<ProductId, Self> {
        &tables.products
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ProductId, Self> {
        &mut tables.products
    }
}

impl Row for Warehouse {
    type Key = WarehouseId;

    fn key(&self) -> WarehouseId {
        self.id
    }

    fn row_key(_: WarehouseId) -> Option<RowKey> {
        None
    }

    fn table(tables: &Tables) -> &BTreeMap<WarehouseId, Self> {
        &tables.warehouses
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<WarehouseId, Self> {
        &mut tables.warehouses
    }
}

impl Row for Route {
    type Key = RouteId;

    fn key(&self) -> RouteId {
        self.id
    }

    fn row_key(_: RouteId) -> Option<RowKey> {
        None
    }

    fn table(tables: &Tables) -> &BTreeMap<RouteId, Self> {
        &tables.routes
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<RouteId, Self> {
        &mut tables.routes
    }
}

impl Row for Lot {
    type Key = LotId;

    fn key(&self) -> LotId {
        self.id_typed()
    }

    fn row_key(key: LotId) -> Option<RowKey> {
        Some(RowKey::Lot(key))
    }

    fn table(tables: &Tables) -> &BTreeMap<LotId, Self> {
        &tables.lots
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<LotId, Self> {
        &mut tables.lots
    }
}

impl Row for Movement {
    type Key = MovementId;

    fn key(&self) -> MovementId {
        self.id_typed()
    }

    fn row_key(key: MovementId) -> Option<RowKey> {
        Some(RowKey::Movement(key))
    }

    fn table(tables: &Tables) -> &BTreeMap<MovementId, Self> {
        &tables.movements
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<MovementId, Self> {
        &mut tables.movements
    }
}

impl Row for TransferRequest {
    type Key = TransferId;

    fn key(&self) -> TransferId {
        self.id_typed()
    }

    fn row_key(key: TransferId) -> Option<RowKey> {
        Some(RowKey::Transfer(key))
    }

    fn table(tables: &Tables) -> &BTreeMap<TransferId, Self> {
        &tables.transfers
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<TransferId, Self> {
        &mut tables.transfers
    }
}

impl Row for SalesOrder {
    type Key = SalesOrderId;

    fn key(&self) -> SalesOrderId {
        self.id_typed()
    }

    fn row_key(key: SalesOrderId) -> Option<RowKey> {
        Some(RowKey::Order(key))
    }

    fn table(tables: &Tables) -> &BTreeMap<SalesOrderId, Self> {
        &tables.orders
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<SalesOrderId, Self> {
        &mut tables.orders
    }
}

impl Row for Shipment {
    type Key = ShipmentId;

    fn key(&self) -> ShipmentId {
        self.id_typed()
    }

    fn row_key(key: ShipmentId) -> Option<RowKey> {
        Some(RowKey::Shipment(key))
    }

    fn table(tables: &Tables) -> &BTreeMap<ShipmentId, Self> {
        &tables.shipments
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ShipmentId, Self> {
        &mut tables.shipments
    }
}

impl Row for Incident {
    type Key = IncidentId;

    fn key(&self) -> IncidentId {
        self.id_typed()
    }

    fn row_key(key: IncidentId) -> Option<RowKey> {
        Some(RowKey::Incident(key))
    }

    fn table(tables: &Tables) -> &BTreeMap<IncidentId, Self> {
        &tables.incidents
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<IncidentId, Self> {
        &mut tables.incidents
    }
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    locks: RowLocks,
    next_tx: AtomicU64,
    lock_timeout: Duration,
}

impl Shared {
    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn get<R: Row>(&self, key: R::Key) -> StoreResult<Option<R>> {
        Ok(R::table(&*self.read()?).get(&key).cloned())
    }
}

/// In-memory store: committed tables behind an `RwLock`, a row-lock table and
/// per-transaction staged writes.
///
/// Cloning shares the same underlying state.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                locks: RowLocks::new(),
                next_tx: AtomicU64::new(1),
                lock_timeout,
            }),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.lock_timeout())
    }
}

impl InventoryStore for InMemoryStore {
    type Tx = InMemoryTx;

    fn begin(&self) -> StoreResult<InMemoryTx> {
        Ok(InMemoryTx {
            shared: self.shared.clone(),
            id: self.shared.next_tx.fetch_add(1, Ordering::Relaxed),
            held: HashSet::new(),
            staged: Tables::default(),
        })
    }

    fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        self.shared.get(id)
    }

    fn warehouse(&self, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        self.shared.get(id)
    }

    fn route(&self, id: RouteId) -> StoreResult<Option<Route>> {
        self.shared.get(id)
    }

    fn lot(&self, id: LotId) -> StoreResult<Option<Lot>> {
        self.shared.get(id)
    }

    fn lots(&self) -> StoreResult<Vec<Lot>> {
        Ok(self.shared.read()?.lots.values().cloned().collect())
    }

    fn movement(&self, id: MovementId) -> StoreResult<Option<Movement>> {
        self.shared.get(id)
    }

    fn movement_lines(&self, id: MovementId) -> StoreResult<Vec<MovementLine>> {
        Ok(self
            .shared
            .read()?
            .movement_lines
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn movements(&self) -> StoreResult<Vec<Movement>> {
        Ok(self.shared.read()?.movements.values().cloned().collect())
    }

    fn transfer(&self, id: TransferId) -> StoreResult<Option<TransferRequest>> {
        self.shared.get(id)
    }

    fn order(&self, id: SalesOrderId) -> StoreResult<Option<SalesOrder>> {
        self.shared.get(id)
    }

    fn shipment(&self, id: ShipmentId) -> StoreResult<Option<Shipment>> {
        self.shared.get(id)
    }

    fn incident(&self, id: IncidentId) -> StoreResult<Option<Incident>> {
        self.shared.get(id)
    }

    fn incidents(&self) -> StoreResult<Vec<Incident>> {
        Ok(self.shared.read()?.incidents.values().cloned().collect())
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Reads see this transaction's staged writes first, then committed state.
#[derive(Debug)]
pub struct InMemoryTx {
    shared: Arc<Shared>,
    id: u64,
    held: HashSet<RowKey>,
    staged: Tables,
}

impl InMemoryTx {
    fn acquire(&mut self, key: RowKey) -> StoreResult<()> {
        if self.held.contains(&key) {
            return Ok(());
        }
        self.shared.locks.acquire(key, self.id, self.shared.lock_timeout)?;
        self.held.insert(key);
        Ok(())
    }

    fn read<R: Row>(&self, key: R::Key) -> StoreResult<Option<R>> {
        if let Some(row) = R::table(&self.staged).get(&key) {
            return Ok(Some(row.clone()));
        }
        self.shared.get(key)
    }

    fn exists<R: Row>(&self, key: R::Key) -> StoreResult<bool> {
        Ok(R::table(&self.staged).contains_key(&key)
            || R::table(&*self.shared.read()?).contains_key(&key))
    }

    fn lock_read<R: Row>(&mut self, key: R::Key) -> StoreResult<Option<R>> {
        if let Some(row_key) = R::row_key(key) {
            self.acquire(row_key)?;
        }
        self.read(key)
    }

    fn insert_new<R: Row>(&mut self, row: R) -> StoreResult<()> {
        let key = row.key();
        if self.exists::<R>(key)? {
            return Err(StoreError::Duplicate(key.to_string()));
        }
        if let Some(row_key) = R::row_key(key) {
            self.acquire(row_key)?;
        }
        R::table_mut(&mut self.staged).insert(key, row);
        Ok(())
    }

    fn update_locked<R: Row>(&mut self, row: R) -> StoreResult<()> {
        let key = row.key();
        if let Some(row_key) = R::row_key(key) {
            if !self.held.contains(&row_key) {
                return Err(StoreError::NotLocked(row_key.to_string()));
            }
        }
        R::table_mut(&mut self.staged).insert(key, row);
        Ok(())
    }

    /// Insert when new (implicitly locked), update under lock otherwise.
    fn save<R: Row>(&mut self, row: R) -> StoreResult<()> {
        if self.exists::<R>(row.key())? {
            self.update_locked(row)
        } else {
            self.insert_new(row)
        }
    }

    /// Rows of `R` visible to this transaction.
    fn visible<R: Row>(&self) -> StoreResult<Vec<R>> {
        let committed = self.shared.read()?;
        let mut rows: BTreeMap<R::Key, R> = R::table(&committed).clone();
        rows.extend(R::table(&self.staged).iter().map(|(k, v)| (*k, v.clone())));
        Ok(rows.into_values().collect())
    }
}

impl StoreTx for InMemoryTx {
    fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        self.read(id)
    }

    fn warehouse(&self, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        self.read(id)
    }

    fn route(&self, id: RouteId) -> StoreResult<Option<Route>> {
        self.read(id)
    }

    fn insert_product(&mut self, product: Product) -> StoreResult<()> {
        self.insert_new(product)
    }

    fn insert_warehouse(&mut self, warehouse: Warehouse) -> StoreResult<()> {
        self.insert_new(warehouse)
    }

    fn insert_route(&mut self, route: Route) -> StoreResult<()> {
        self.insert_new(route)
    }

    fn lock_lot(&mut self, id: LotId) -> StoreResult<Option<Lot>> {
        self.lock_read(id)
    }

    fn lock_lots_for(
        &mut self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Vec<Lot>> {
        let candidates: Vec<LotId> = self
            .visible::<Lot>()?
            .into_iter()
            .filter(|lot| lot.holds(product_id, warehouse_id))
            .map(|lot| lot.id_typed())
            .collect();

        let mut locked = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(lot) = self.lock_lot(id)? {
                if lot.holds(product_id, warehouse_id) {
                    locked.push(lot);
                }
            }
        }
        Ok(locked)
    }

    fn insert_lot(&mut self, lot: Lot) -> StoreResult<()> {
        self.insert_new(lot)
    }

    fn update_lot(&mut self, lot: Lot) -> StoreResult<()> {
        self.update_locked(lot)
    }

    fn lock_movement(&mut self, id: MovementId) -> StoreResult<Option<Movement>> {
        self.lock_read(id)
    }

    fn movement_lines(&self, id: MovementId) -> StoreResult<Vec<MovementLine>> {
        let mut lines = self
            .shared
            .read()?
            .movement_lines
            .get(&id)
            .cloned()
            .unwrap_or_default();
        if let Some(staged) = self.staged.movement_lines.get(&id) {
            lines.extend(staged.iter().cloned());
        }
        Ok(lines)
    }

    fn reversal_of(&self, id: MovementId) -> StoreResult<Option<MovementId>> {
        Ok(self
            .visible::<Movement>()?
            .into_iter()
            .find(|m| m.reverses() == Some(id))
            .map(|m| m.id_typed()))
    }

    fn insert_movement(&mut self, movement: Movement, lines: Vec<MovementLine>) -> StoreResult<()> {
        let id = movement.id_typed();
        self.insert_new(movement)?;
        if !lines.is_empty() {
            self.staged.movement_lines.entry(id).or_default().extend(lines);
        }
        Ok(())
    }

    fn update_movement(&mut self, movement: Movement) -> StoreResult<()> {
        self.update_locked(movement)
    }

    fn append_movement_line(&mut self, line: MovementLine) -> StoreResult<()> {
        let row_key = RowKey::Movement(line.movement_id);
        if !self.held.contains(&row_key) {
            return Err(StoreError::NotLocked(row_key.to_string()));
        }
        self.staged
            .movement_lines
            .entry(line.movement_id)
            .or_default()
            .push(line);
        Ok(())
    }

    fn lock_transfer(&mut self, id: TransferId) -> StoreResult<Option<TransferRequest>> {
        self.lock_read(id)
    }

    fn save_transfer(&mut self, transfer: TransferRequest) -> StoreResult<()> {
        self.save(transfer)
    }

    fn lock_order(&mut self, id: SalesOrderId) -> StoreResult<Option<SalesOrder>> {
        self.lock_read(id)
    }

    fn save_order(&mut self, order: SalesOrder) -> StoreResult<()> {
        self.save(order)
    }

    fn lock_shipment(&mut self, id: ShipmentId) -> StoreResult<Option<Shipment>> {
        self.lock_read(id)
    }

    fn save_shipment(&mut self, shipment: Shipment) -> StoreResult<()> {
        self.save(shipment)
    }

    fn shipments_for_order(&self, order_id: SalesOrderId) -> StoreResult<Vec<ShipmentId>> {
        Ok(self
            .visible::<Shipment>()?
            .into_iter()
            .filter(|s| s.carries_order(order_id))
            .map(|s| s.id_typed())
            .collect())
    }

    fn lock_incident(&mut self, id: IncidentId) -> StoreResult<Option<Incident>> {
        self.lock_read(id)
    }

    fn save_incident(&mut self, incident: Incident) -> StoreResult<()> {
        self.save(incident)
    }

    fn incident_for_line(&self, line_id: IncidentLineId) -> StoreResult<Option<IncidentId>> {
        Ok(self
            .visible::<Incident>()?
            .into_iter()
            .find(|i| i.line(line_id).is_some())
            .map(|i| i.id_typed()))
    }

    fn commit(mut self) -> StoreResult<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.shared.tables.write().map_err(|_| StoreError::Poisoned)?;
        tables.merge(staged);
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        self.shared.locks.release_all(self.id, self.held.drain());
    }
}
