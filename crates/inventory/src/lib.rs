//! Inventory domain module: lots, movements and FIFO allocation.
//!
//! This crate contains business rules for lot-based stock, implemented purely
//! as deterministic domain logic (no IO, no locking, no storage). The infra
//! layer runs these rules inside its transactions.

pub mod allocation;
pub mod catalog;
pub mod lot;
pub mod movement;

pub use allocation::{
    AllocationLine, AllocationPreview, ClaimLedger, allocate_fifo, allocate_fifo_claimed,
    allocate_single_or_fifo, fifo_candidates,
};
pub use catalog::{Product, Route, Warehouse};
pub use lot::{Lot, LotId, LotStatus, NewLot};
pub use movement::{
    Direction, Movement, MovementId, MovementKind, MovementLine, MovementLineId, MovementPhase,
    MovementTotals, NewMovement,
};
