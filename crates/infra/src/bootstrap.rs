//! One-time start-up routine: make sure the system warehouses exist.

use tracing::info;

use lotflow_core::{DomainError, WarehouseId};
use lotflow_inventory::Warehouse;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::store::{InventoryStore, StoreTx};

/// Register the central, incidents and embark-buffer warehouses named by
/// `config` when they are missing. Returns the ids it created; running it
/// again creates nothing.
pub fn ensure_system_warehouses<S: InventoryStore>(
    store: &S,
    config: &EngineConfig,
) -> EngineResult<Vec<WarehouseId>> {
    config
        .validate()
        .map_err(|err| DomainError::validation(err.to_string()))?;

    let wanted = [
        (config.central_warehouse, "Central distribution center", true),
        (config.incidents_warehouse, "Incidents", false),
        (config.embark_buffer_warehouse, "Embark buffer", false),
    ];

    let mut tx = store.begin()?;
    let mut created = Vec::new();
    for (id, name, is_distribution_center) in wanted {
        if tx.warehouse(id)?.is_some() {
            continue;
        }
        tx.insert_warehouse(Warehouse {
            id,
            name: name.to_string(),
            is_distribution_center,
        })?;
        created.push(id);
    }
    tx.commit()?;

    if !created.is_empty() {
        info!(created = created.len(), "system warehouses registered");
    }
    Ok(created)
}
