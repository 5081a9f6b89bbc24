//! Row-level lock table.
//!
//! Owners are transaction ids. Locks are re-entrant for their owner and are
//! released all at once when the transaction ends (commit or drop).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use lotflow_incidents::IncidentId;
use lotflow_inventory::{LotId, MovementId};
use lotflow_sales::SalesOrderId;
use lotflow_shipping::ShipmentId;
use lotflow_transfers::TransferId;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    Lot(LotId),
    Movement(MovementId),
    Transfer(TransferId),
    Order(SalesOrderId),
    Shipment(ShipmentId),
    Incident(IncidentId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Lot(id) => write!(f, "lot {id}"),
            RowKey::Movement(id) => write!(f, "movement {id}"),
            RowKey::Transfer(id) => write!(f, "transfer request {id}"),
            RowKey::Order(id) => write!(f, "sales order {id}"),
            RowKey::Shipment(id) => write!(f, "shipment {id}"),
            RowKey::Incident(id) => write!(f, "incident {id}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct RowLocks {
    owners: Mutex<HashMap<RowKey, u64>>,
    released: Condvar,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `owner` holds `key`, or fail once `timeout` has elapsed.
    pub fn acquire(&self, key: RowKey, owner: u64, timeout: Duration) -> StoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut owners = self.owners.lock().map_err(|_| StoreError::Poisoned)?;

        loop {
            match owners.get(&key) {
                None => {
                    owners.insert(key, owner);
                    return Ok(());
                }
                Some(&holder) if holder == owner => return Ok(()),
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::LockTimeout(key.to_string()));
                    }
                    let (guard, _) = self
                        .released
                        .wait_timeout(owners, deadline - now)
                        .map_err(|_| StoreError::Poisoned)?;
                    owners = guard;
                }
            }
        }
    }

    /// Release every key in `keys` still held by `owner`.
    pub fn release_all<I>(&self, owner: u64, keys: I)
    where
        I: IntoIterator<Item = RowKey>,
    {
        let mut owners = match self.owners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in keys {
            if owners.get(&key) == Some(&owner) {
                owners.remove(&key);
            }
        }
        drop(owners);
        self.released.notify_all();
    }

    pub fn holder(&self, key: RowKey) -> Option<u64> {
        self.owners.lock().ok().and_then(|owners| owners.get(&key).copied())
    }
}
