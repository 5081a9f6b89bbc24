//! FIFO allocation (pure).
//!
//! Every function here only reads the lots it is given and returns a plan. The
//! plan is applied by the infra layer's commit step, under row locks, after
//! re-checking each lot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lotflow_core::{AggregateId, DomainError, DomainResult, ProductId, Shortfall, WarehouseId};

use crate::lot::{Lot, LotId};

/// Quantity taken from one lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub lot_id: LotId,
    pub quantity: i64,
}

/// Result of an allocation: which lots cover how much of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPreview {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub requested: i64,
    pub lines: Vec<AllocationLine>,
    pub covered: i64,
    pub shortfall: i64,
    pub complete: bool,
}

impl AllocationPreview {
    fn from_lines(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        requested: i64,
        lines: Vec<AllocationLine>,
    ) -> Self {
        let covered: i64 = lines.iter().map(|l| l.quantity).sum();
        let shortfall = requested - covered;
        Self {
            product_id,
            warehouse_id,
            requested,
            lines,
            covered,
            shortfall,
            complete: shortfall == 0,
        }
    }

    pub fn to_shortfall(&self, order_id: Option<AggregateId>) -> Shortfall {
        Shortfall {
            product_id: self.product_id,
            order_id,
            requested: self.requested,
            covered: self.covered,
        }
    }

    /// `Ok(self)` when complete, `InsufficientStock` otherwise.
    pub fn require_complete(self) -> DomainResult<Self> {
        if self.complete {
            Ok(self)
        } else {
            Err(DomainError::InsufficientStock(vec![self.to_shortfall(None)]))
        }
    }
}

/// Quantities already promised per lot within one operation.
///
/// Shared across several allocations so the same units are never handed to
/// two demands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimLedger {
    claimed: BTreeMap<LotId, i64>,
}

impl ClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claimed(&self, lot_id: LotId) -> i64 {
        self.claimed.get(&lot_id).copied().unwrap_or(0)
    }

    /// What is left of `lot` after earlier claims.
    pub fn available(&self, lot: &Lot) -> i64 {
        (lot.quantity() - self.claimed(lot.id_typed())).max(0)
    }

    fn claim(&mut self, lot_id: LotId, quantity: i64) {
        *self.claimed.entry(lot_id).or_insert(0) += quantity;
    }

    /// Total claimed per lot, in lot-id order.
    pub fn iter(&self) -> impl Iterator<Item = (LotId, i64)> + '_ {
        self.claimed.iter().map(|(id, qty)| (*id, *qty))
    }
}

/// Lots eligible for `product` in `warehouse`, oldest first, ties by lot id.
pub fn fifo_candidates(product_id: ProductId, warehouse_id: WarehouseId, lots: &[Lot]) -> Vec<&Lot> {
    let mut candidates: Vec<&Lot> = lots
        .iter()
        .filter(|lot| lot.holds(product_id, warehouse_id) && lot.is_available())
        .collect();
    candidates.sort_by_key(|lot| (lot.received_at(), lot.id_typed()));
    candidates
}

fn ensure_positive(requested: i64) -> DomainResult<()> {
    if requested <= 0 {
        return Err(DomainError::validation("requested quantity must be positive"));
    }
    Ok(())
}

/// Plain FIFO preview over `lots`.
pub fn allocate_fifo(
    product_id: ProductId,
    warehouse_id: WarehouseId,
    requested: i64,
    lots: &[Lot],
) -> DomainResult<AllocationPreview> {
    allocate_fifo_claimed(product_id, warehouse_id, requested, lots, &mut ClaimLedger::new())
}

/// FIFO preview that skips units already in `ledger` and records its own
/// claims there.
pub fn allocate_fifo_claimed(
    product_id: ProductId,
    warehouse_id: WarehouseId,
    requested: i64,
    lots: &[Lot],
    ledger: &mut ClaimLedger,
) -> DomainResult<AllocationPreview> {
    ensure_positive(requested)?;

    let mut remaining = requested;
    let mut lines = Vec::new();

    for lot in fifo_candidates(product_id, warehouse_id, lots) {
        if remaining == 0 {
            break;
        }
        let take = ledger.available(lot).min(remaining);
        if take == 0 {
            continue;
        }
        ledger.claim(lot.id_typed(), take);
        lines.push(AllocationLine {
            lot_id: lot.id_typed(),
            quantity: take,
        });
        remaining -= take;
    }

    Ok(AllocationPreview::from_lines(product_id, warehouse_id, requested, lines))
}

/// Prefer the oldest single lot that covers `requested` on its own; fall back
/// to plain FIFO across lots.
pub fn allocate_single_or_fifo(
    product_id: ProductId,
    warehouse_id: WarehouseId,
    requested: i64,
    lots: &[Lot],
) -> DomainResult<AllocationPreview> {
    ensure_positive(requested)?;

    let single = fifo_candidates(product_id, warehouse_id, lots)
        .into_iter()
        .find(|lot| lot.quantity() >= requested);

    match single {
        Some(lot) => Ok(AllocationPreview::from_lines(
            product_id,
            warehouse_id,
            requested,
            vec![AllocationLine {
                lot_id: lot.id_typed(),
                quantity: requested,
            }],
        )),
        None => allocate_fifo(product_id, warehouse_id, requested, lots),
    }
}
