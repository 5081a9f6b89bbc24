//! Infrastructure layer: transactional store, engine services, configuration,
//! bootstrap and notification dispatch.

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod store;

pub use bootstrap::ensure_system_warehouses;
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    AssembleShipmentInput, DeliveredLine, IncidentLineInput, InventoryEngine, ReceiveStock,
    Receipt, SplitOutcome, TransferRequestInput,
};
pub use error::{EngineError, EngineResult, StoreError, StoreResult};
pub use notify::{Notifier, Outbox};
pub use store::{InMemoryStore, InMemoryTx, InventoryStore, StoreTx};

#[cfg(test)]
mod integration_tests;
