//! Movement ledger records.
//!
//! A movement is opened PENDING with zero lines, lines are added while stock is
//! touched, and `terminate` derives the totals once. After that the movement
//! and its lines are history: corrections are new compensating movements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotflow_core::{ActorId, DomainError, DomainResult, Entity, ProductId, WarehouseId};

use crate::lot::{Lot, LotId};

lotflow_core::aggregate_id!(
    /// Movement identifier.
    MovementId
);

lotflow_core::aggregate_id!(
    /// Movement line identifier.
    MovementLineId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Receiving,
    Sale,
    TransferOut,
    TransferIn,
    ShipmentOut,
    ShipmentIn,
    Transformation,
    Shrinkage,
    CancellationReversal,
    IncidentAdjustment,
}

impl MovementKind {
    /// Direction implied by the kind. A cancellation reversal has none of its
    /// own: it mirrors the movement it reverses.
    pub fn direction(self) -> Option<Direction> {
        match self {
            MovementKind::Receiving
            | MovementKind::TransferIn
            | MovementKind::ShipmentIn
            | MovementKind::IncidentAdjustment => Some(Direction::In),
            MovementKind::Sale
            | MovementKind::TransferOut
            | MovementKind::ShipmentOut
            | MovementKind::Transformation
            | MovementKind::Shrinkage => Some(Direction::Out),
            MovementKind::CancellationReversal => None,
        }
    }

    /// Kinds that move lots between warehouses rather than create or consume
    /// stock.
    pub fn is_relocation(self) -> bool {
        matches!(
            self,
            MovementKind::TransferOut
                | MovementKind::TransferIn
                | MovementKind::ShipmentOut
                | MovementKind::ShipmentIn
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementPhase {
    Pending,
    Terminated,
}

/// Totals derived from the lines when the movement terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementTotals {
    pub lines: usize,
    pub quantity: i64,
    pub cost: i64,
}

/// Input for opening a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub kind: MovementKind,
    pub source_warehouse: WarehouseId,
    #[serde(default)]
    pub destination_warehouse: Option<WarehouseId>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    id: MovementId,
    direction: Direction,
    kind: MovementKind,
    source_warehouse: WarehouseId,
    destination_warehouse: Option<WarehouseId>,
    phase: MovementPhase,
    reference: Option<String>,
    note: Option<String>,
    reverses: Option<MovementId>,
    totals: Option<MovementTotals>,
    created_by: ActorId,
    created_at: DateTime<Utc>,
}

/// One (product, lot, quantity) entry of a movement, with the unit cost the
/// lot had at the time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub id: MovementLineId,
    pub movement_id: MovementId,
    pub product_id: ProductId,
    pub lot_id: LotId,
    pub quantity: i64,
    pub unit_cost: i64,
    pub total_cost: i64,
}

impl Movement {
    pub fn open(
        id: MovementId,
        new: NewMovement,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let direction = new.kind.direction().ok_or_else(|| {
            DomainError::validation("cancellation reversals are opened from the reversed movement")
        })?;
        if new.destination_warehouse == Some(new.source_warehouse) {
            return Err(DomainError::validation(
                "destination warehouse must differ from source warehouse",
            ));
        }

        Ok(Self {
            id,
            direction,
            kind: new.kind,
            source_warehouse: new.source_warehouse,
            destination_warehouse: new.destination_warehouse,
            phase: MovementPhase::Pending,
            reference: new.reference,
            note: new.note,
            reverses: None,
            totals: None,
            created_by: actor,
            created_at: at,
        })
    }

    /// Open the compensating movement for a terminated `original`.
    pub fn compensating(
        id: MovementId,
        original: &Movement,
        note: Option<String>,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if original.phase != MovementPhase::Terminated {
            return Err(DomainError::invalid_transition(
                "movement",
                original.phase,
                "reverse",
            ));
        }
        if original.kind == MovementKind::CancellationReversal {
            return Err(DomainError::validation("a reversal cannot itself be reversed"));
        }

        Ok(Self {
            id,
            direction: original.direction.opposite(),
            kind: MovementKind::CancellationReversal,
            source_warehouse: original.source_warehouse,
            destination_warehouse: original.destination_warehouse,
            phase: MovementPhase::Pending,
            reference: original.reference.clone(),
            note,
            reverses: Some(original.id),
            totals: None,
            created_by: actor,
            created_at: at,
        })
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn source_warehouse(&self) -> WarehouseId {
        self.source_warehouse
    }

    pub fn destination_warehouse(&self) -> Option<WarehouseId> {
        self.destination_warehouse
    }

    pub fn phase(&self) -> MovementPhase {
        self.phase
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn reverses(&self) -> Option<MovementId> {
        self.reverses
    }

    pub fn totals(&self) -> Option<MovementTotals> {
        self.totals
    }

    pub fn created_by(&self) -> ActorId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Build the line recording `quantity` of `lot`, snapshotting its cost.
    pub fn line_for(
        &self,
        line_id: MovementLineId,
        lot: &Lot,
        quantity: i64,
    ) -> DomainResult<MovementLine> {
        if self.phase != MovementPhase::Pending {
            return Err(DomainError::invalid_transition("movement", self.phase, "add lines to"));
        }
        if quantity <= 0 {
            return Err(DomainError::validation("movement line quantity must be positive"));
        }
        let total_cost = quantity
            .checked_mul(lot.unit_cost())
            .ok_or_else(|| DomainError::validation("movement line cost overflow"))?;

        Ok(MovementLine {
            id: line_id,
            movement_id: self.id,
            product_id: lot.product_id(),
            lot_id: lot.id_typed(),
            quantity,
            unit_cost: lot.unit_cost(),
            total_cost,
        })
    }

    /// Derive totals from `lines` and close the movement.
    pub fn terminate(&mut self, lines: &[MovementLine]) -> DomainResult<MovementTotals> {
        if self.phase != MovementPhase::Pending {
            return Err(DomainError::invalid_transition("movement", self.phase, "terminate"));
        }
        if let Some(foreign) = lines.iter().find(|l| l.movement_id != self.id) {
            return Err(DomainError::invariant(format!(
                "line {} belongs to movement {}",
                foreign.id, foreign.movement_id
            )));
        }

        let mut totals = MovementTotals {
            lines: lines.len(),
            quantity: 0,
            cost: 0,
        };
        for line in lines {
            totals.quantity = totals
                .quantity
                .checked_add(line.quantity)
                .ok_or_else(|| DomainError::validation("movement quantity overflow"))?;
            totals.cost = totals
                .cost
                .checked_add(line.total_cost)
                .ok_or_else(|| DomainError::validation("movement cost overflow"))?;
        }

        self.totals = Some(totals);
        self.phase = MovementPhase::Terminated;
        Ok(totals)
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lot::NewLot;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_lot(quantity: i64, unit_cost: i64) -> Lot {
        Lot::create(
            LotId::generate(),
            NewLot {
                product_id: ProductId::new(),
                warehouse_id: WarehouseId::new(),
                quantity,
                unit_cost,
                received_at: test_time(),
                location: None,
                source_ref: None,
            },
            ActorId::new(),
            test_time(),
        )
        .unwrap()
    }

    fn open(kind: MovementKind) -> Movement {
        Movement::open(
            MovementId::generate(),
            NewMovement {
                kind,
                source_warehouse: WarehouseId::new(),
                destination_warehouse: None,
                reference: Some("SO-7".to_string()),
                note: None,
            },
            ActorId::new(),
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn direction_follows_kind() {
        assert_eq!(open(MovementKind::Sale).direction(), Direction::Out);
        assert_eq!(open(MovementKind::Receiving).direction(), Direction::In);
        assert_eq!(open(MovementKind::ShipmentIn).direction(), Direction::In);
    }

    #[test]
    fn open_rejects_same_source_and_destination() {
        let wh = WarehouseId::new();
        let err = Movement::open(
            MovementId::generate(),
            NewMovement {
                kind: MovementKind::TransferOut,
                source_warehouse: wh,
                destination_warehouse: Some(wh),
                reference: None,
                note: None,
            },
            ActorId::new(),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn line_snapshots_unit_cost() {
        let movement = open(MovementKind::Sale);
        let lot = test_lot(10, 125);

        let line = movement.line_for(MovementLineId::generate(), &lot, 4).unwrap();

        assert_eq!(line.unit_cost, 125);
        assert_eq!(line.total_cost, 500);
        assert_eq!(line.lot_id, lot.id_typed());
        assert_eq!(line.product_id, lot.product_id());
    }

    #[test]
    fn terminate_derives_totals_and_freezes_movement() {
        let mut movement = open(MovementKind::Sale);
        let a = test_lot(10, 100);
        let b = test_lot(10, 300);
        let lines = vec![
            movement.line_for(MovementLineId::generate(), &a, 2).unwrap(),
            movement.line_for(MovementLineId::generate(), &b, 3).unwrap(),
        ];

        let totals = movement.terminate(&lines).unwrap();

        assert_eq!(totals, MovementTotals { lines: 2, quantity: 5, cost: 1100 });
        assert_eq!(movement.phase(), MovementPhase::Terminated);

        let err = movement.line_for(MovementLineId::generate(), &a, 1).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert!(movement.terminate(&lines).is_err());
    }

    #[test]
    fn compensating_movement_mirrors_direction_and_references_original() {
        let mut original = open(MovementKind::Sale);
        original.terminate(&[]).unwrap();

        let reversal =
            Movement::compensating(MovementId::generate(), &original, None, ActorId::new(), test_time())
                .unwrap();

        assert_eq!(reversal.kind(), MovementKind::CancellationReversal);
        assert_eq!(reversal.direction(), Direction::In);
        assert_eq!(reversal.reverses(), Some(original.id_typed()));
        assert_eq!(reversal.phase(), MovementPhase::Pending);
    }

    #[test]
    fn pending_movement_cannot_be_reversed() {
        let original = open(MovementKind::Sale);
        let err =
            Movement::compensating(MovementId::generate(), &original, None, ActorId::new(), test_time())
                .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }
}
