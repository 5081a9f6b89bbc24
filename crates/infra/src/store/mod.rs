//! Transactional inventory storage boundary.
//!
//! Engine services only talk to [`InventoryStore`]/[`StoreTx`]. The shipped
//! backend is in-memory; a relational backend implements the same traits with
//! `SELECT ... FOR UPDATE` behind the `lock_*` reads.

pub mod in_memory;
pub mod locks;
pub mod r#trait;

pub use in_memory::{InMemoryStore, InMemoryTx};
pub use locks::{RowKey, RowLocks};
pub use r#trait::{InventoryStore, StoreTx};
