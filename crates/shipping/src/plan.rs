//! Embarque planning (pure).
//!
//! Order lines are claimed first, in input order, then tara lines, all through
//! one shared claim ledger. Nothing is mutated here: the plan lists which lot
//! moves are needed and the infra layer performs them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use lotflow_core::{DomainError, DomainResult, ProductId, RouteId, Shortfall, WarehouseId};
use lotflow_inventory::{AllocationPreview, ClaimLedger, Lot, LotId, allocate_fifo_claimed};
use lotflow_sales::{SalesOrder, SalesOrderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Lines of one sales order to put on the shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDemand {
    pub order_id: SalesOrderId,
    pub lines: Vec<DemandLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbarqueRequest {
    pub route_id: RouteId,
    pub origin_warehouse: WarehouseId,
    pub buffer_warehouse: WarehouseId,
    #[serde(default)]
    pub orders: Vec<OrderDemand>,
    #[serde(default)]
    pub tara: Vec<DemandLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ShipmentTarget {
    Order {
        order_id: SalesOrderId,
        line_no: u32,
        unit_price: i64,
    },
    Tara,
}

impl ShipmentTarget {
    pub fn order_id(&self) -> Option<SalesOrderId> {
        match self {
            ShipmentTarget::Order { order_id, .. } => Some(*order_id),
            ShipmentTarget::Tara => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub target: ShipmentTarget,
    pub product_id: ProductId,
    pub requested: i64,
    pub allocation: AllocationPreview,
    /// For order lines: the order line is fully loaded once this line lands.
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotMoveKind {
    /// Carve the claimed quantity off into a new lot, then relocate that.
    Split,
    /// The claim empties the lot: relocate the original.
    Relocate,
}

/// One claim on one source lot, tied to the planned line it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotMove {
    pub line_index: usize,
    pub source_lot: LotId,
    pub quantity: i64,
    pub kind: LotMoveKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbarquePlan {
    pub lines: Vec<PlannedLine>,
    pub moves: Vec<LotMove>,
}

impl EmbarquePlan {
    pub fn moves_for(&self, line_index: usize) -> impl Iterator<Item = &LotMove> + '_ {
        self.moves.iter().filter(move |m| m.line_index == line_index)
    }
}

/// Products touched by `request`, ascending (the lock order).
pub fn requested_products(request: &EmbarqueRequest) -> BTreeSet<ProductId> {
    request
        .orders
        .iter()
        .flat_map(|o| o.lines.iter())
        .chain(request.tara.iter())
        .map(|l| l.product_id)
        .collect()
}

fn validate_shape(request: &EmbarqueRequest) -> DomainResult<()> {
    if request.origin_warehouse == request.buffer_warehouse {
        return Err(DomainError::validation(
            "origin warehouse must differ from the embark buffer",
        ));
    }
    if request.orders.iter().all(|o| o.lines.is_empty()) && request.tara.is_empty() {
        return Err(DomainError::validation("shipment needs at least one line"));
    }

    let mut orders_seen = HashSet::new();
    for demand in &request.orders {
        if !orders_seen.insert(demand.order_id) {
            return Err(DomainError::validation(format!(
                "order {} listed twice",
                demand.order_id
            )));
        }
        ensure_distinct_positive(&demand.lines)?;
    }
    ensure_distinct_positive(&request.tara)
}

fn ensure_distinct_positive(lines: &[DemandLine]) -> DomainResult<()> {
    let mut seen = HashSet::new();
    for line in lines {
        if line.quantity <= 0 {
            return Err(DomainError::validation("shipment quantity must be positive"));
        }
        if !seen.insert(line.product_id) {
            return Err(DomainError::validation(format!(
                "product {} appears on more than one line",
                line.product_id
            )));
        }
    }
    Ok(())
}

fn resolve_target(
    orders: &[SalesOrder],
    order_id: SalesOrderId,
    line: &DemandLine,
) -> DomainResult<(ShipmentTarget, bool)> {
    let order = orders
        .iter()
        .find(|o| o.id_typed() == order_id)
        .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")))?;
    let order_line = order.line_for(line.product_id).ok_or_else(|| {
        DomainError::validation(format!(
            "order {} has no line for product {}",
            order_id, line.product_id
        ))
    })?;
    if order_line.is_reconciled() {
        return Err(DomainError::invalid_transition("order line", "reconciled", "load"));
    }
    if line.quantity > order_line.pending_load() {
        return Err(DomainError::validation(format!(
            "cannot load {} of product {} on order {}: {} of {} already loaded",
            line.quantity, line.product_id, order_id, order_line.loaded_quantity, order_line.quantity
        )));
    }

    let complete = order_line.loaded_quantity + line.quantity == order_line.quantity;
    Ok((
        ShipmentTarget::Order {
            order_id,
            line_no: order_line.line_no,
            unit_price: order_line.unit_price,
        },
        complete,
    ))
}

/// Plan an embarque against `lots` (origin-warehouse lots, already locked by
/// the caller) and the current state of the requested `orders`.
pub fn plan_embarque(
    request: &EmbarqueRequest,
    orders: &[SalesOrder],
    lots: &[Lot],
) -> DomainResult<EmbarquePlan> {
    validate_shape(request)?;

    let mut ledger = ClaimLedger::new();
    let mut lines = Vec::new();
    let mut shortfalls: Vec<Shortfall> = Vec::new();

    let order_lines = request
        .orders
        .iter()
        .flat_map(|o| o.lines.iter().map(move |l| (Some(o.order_id), l)));
    let tara_lines = request.tara.iter().map(|l| (None, l));

    for (order_id, demand) in order_lines.chain(tara_lines) {
        let (target, complete) = match order_id {
            Some(order_id) => resolve_target(orders, order_id, demand)?,
            None => (ShipmentTarget::Tara, true),
        };

        let allocation = allocate_fifo_claimed(
            demand.product_id,
            request.origin_warehouse,
            demand.quantity,
            lots,
            &mut ledger,
        )?;
        if !allocation.complete {
            shortfalls.push(allocation.to_shortfall(order_id.map(|id| id.0)));
        }

        lines.push(PlannedLine {
            target,
            product_id: demand.product_id,
            requested: demand.quantity,
            allocation,
            complete,
        });
    }

    if !shortfalls.is_empty() {
        return Err(DomainError::InsufficientStock(shortfalls));
    }

    let moves = plan_lot_moves(&lines, lots)?;
    Ok(EmbarquePlan { lines, moves })
}

fn plan_lot_moves(lines: &[PlannedLine], lots: &[Lot]) -> DomainResult<Vec<LotMove>> {
    let mut claims: BTreeMap<LotId, Vec<(usize, i64)>> = BTreeMap::new();
    for (idx, line) in lines.iter().enumerate() {
        for taken in &line.allocation.lines {
            claims.entry(taken.lot_id).or_default().push((idx, taken.quantity));
        }
    }

    let mut moves = Vec::new();
    for (lot_id, lot_claims) in claims {
        let lot = lots
            .iter()
            .find(|l| l.id_typed() == lot_id)
            .ok_or_else(|| DomainError::invariant(format!("planned lot {lot_id} not supplied")))?;
        let total: i64 = lot_claims.iter().map(|(_, qty)| qty).sum();
        let last = lot_claims.len() - 1;

        for (i, (line_index, quantity)) in lot_claims.into_iter().enumerate() {
            let kind = if i == last && total == lot.quantity() {
                LotMoveKind::Relocate
            } else {
                LotMoveKind::Split
            };
            moves.push(LotMove {
                line_index,
                source_lot: lot_id,
                quantity,
                kind,
            });
        }
    }
    Ok(moves)
}
