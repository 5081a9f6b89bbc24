use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotflow_core::{ActorId, DomainError, DomainResult, Entity, ProductId, WarehouseId};

lotflow_core::aggregate_id!(
    /// Lot identifier. Ordering is the FIFO tie-breaker.
    LotId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotStatus {
    Active,
    Deleted,
}

/// Input for creating a lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLot {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    /// Cost per unit in the smallest currency unit.
    pub unit_cost: i64,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub source_ref: Option<String>,
}

/// A batch of one product stored in one warehouse.
///
/// Quantity never goes negative. Lots are never removed: an emptied lot stays
/// on record and may be retired (soft-deleted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    id: LotId,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    quantity: i64,
    unit_cost: i64,
    received_at: DateTime<Utc>,
    location: Option<String>,
    parent_lot_id: Option<LotId>,
    status: LotStatus,
    source_ref: Option<String>,
    created_by: ActorId,
    created_at: DateTime<Utc>,
}

impl Lot {
    pub fn create(id: LotId, new: NewLot, actor: ActorId, at: DateTime<Utc>) -> DomainResult<Self> {
        if new.quantity < 0 {
            return Err(DomainError::invalid_quantity("lot quantity cannot be negative"));
        }
        if new.unit_cost < 0 {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        Ok(Self {
            id,
            product_id: new.product_id,
            warehouse_id: new.warehouse_id,
            quantity: new.quantity,
            unit_cost: new.unit_cost,
            received_at: new.received_at,
            location: new.location,
            parent_lot_id: None,
            status: LotStatus::Active,
            source_ref: new.source_ref,
            created_by: actor,
            created_at: at,
        })
    }

    /// Compensating lot derived from `reference` (incident adjustments).
    ///
    /// Copies product and unit cost, records `reference` as parent.
    pub fn derived_from(
        id: LotId,
        reference: &Lot,
        warehouse_id: WarehouseId,
        quantity: i64,
        source_ref: Option<String>,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::invalid_quantity("derived lot quantity must be positive"));
        }
        Ok(Self {
            id,
            product_id: reference.product_id,
            warehouse_id,
            quantity,
            unit_cost: reference.unit_cost,
            received_at: at,
            location: None,
            parent_lot_id: Some(reference.id),
            status: LotStatus::Active,
            source_ref,
            created_by: actor,
            created_at: at,
        })
    }

    pub fn id_typed(&self) -> LotId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_cost(&self) -> i64 {
        self.unit_cost
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn parent_lot_id(&self) -> Option<LotId> {
        self.parent_lot_id
    }

    pub fn status(&self) -> LotStatus {
        self.status
    }

    pub fn source_ref(&self) -> Option<&str> {
        self.source_ref.as_deref()
    }

    pub fn created_by(&self) -> ActorId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.status == LotStatus::Active
    }

    /// Active with stock left: eligible for allocation.
    pub fn is_available(&self) -> bool {
        self.is_active() && self.quantity > 0
    }

    /// Whether this lot holds `product` in `warehouse`.
    pub fn holds(&self, product_id: ProductId, warehouse_id: WarehouseId) -> bool {
        self.product_id == product_id && self.warehouse_id == warehouse_id
    }

    fn ensure_active(&self, action: &'static str) -> DomainResult<()> {
        if !self.is_active() {
            return Err(DomainError::invalid_transition("lot", self.status, action));
        }
        Ok(())
    }

    pub fn adjust_quantity(&mut self, delta: i64) -> DomainResult<()> {
        self.ensure_active("adjust")?;
        let next = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::invalid_quantity("lot quantity overflow"))?;
        if next < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "lot {} holds {}, cannot apply {}",
                self.id, self.quantity, delta
            )));
        }
        self.quantity = next;
        Ok(())
    }

    /// Move the whole lot to another warehouse. Identity is preserved, the
    /// location slot is cleared.
    pub fn relocate(&mut self, warehouse_id: WarehouseId) -> DomainResult<()> {
        self.ensure_active("relocate")?;
        if self.warehouse_id == warehouse_id {
            return Err(DomainError::validation("lot is already in that warehouse"));
        }
        self.warehouse_id = warehouse_id;
        self.location = None;
        Ok(())
    }

    pub fn assign_location(&mut self, location: Option<String>) -> DomainResult<()> {
        self.ensure_active("assign location to")?;
        self.location = location.filter(|l| !l.trim().is_empty());
        Ok(())
    }

    /// Carve `quantity` off into a new lot in the same warehouse.
    ///
    /// The new lot keeps ingress time and unit cost, and points back to this
    /// lot as its parent.
    pub fn split(
        &mut self,
        quantity: i64,
        new_id: LotId,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> DomainResult<Lot> {
        self.ensure_active("split")?;
        if quantity <= 0 {
            return Err(DomainError::validation("split quantity must be positive"));
        }
        if quantity > self.quantity {
            return Err(DomainError::invalid_quantity(format!(
                "cannot split {} from lot {} holding {}",
                quantity, self.id, self.quantity
            )));
        }

        self.quantity -= quantity;

        Ok(Lot {
            id: new_id,
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            quantity,
            unit_cost: self.unit_cost,
            received_at: self.received_at,
            location: None,
            parent_lot_id: Some(self.id),
            status: LotStatus::Active,
            source_ref: self.source_ref.clone(),
            created_by: actor,
            created_at: at,
        })
    }

    /// Soft-delete an emptied lot.
    pub fn retire(&mut self) -> DomainResult<()> {
        self.ensure_active("retire")?;
        if self.quantity != 0 {
            return Err(DomainError::validation(format!(
                "lot {} still holds {} units",
                self.id, self.quantity
            )));
        }
        self.status = LotStatus::Deleted;
        Ok(())
    }
}

impl Entity for Lot {
    type Id = LotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    }

    fn test_lot(quantity: i64) -> Lot {
        Lot::create(
            LotId::generate(),
            NewLot {
                product_id: ProductId::new(),
                warehouse_id: WarehouseId::new(),
                quantity,
                unit_cost: 250,
                received_at: test_time(),
                location: Some("A-01".to_string()),
                source_ref: Some("REC-1".to_string()),
            },
            ActorId::new(),
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn create_rejects_negative_quantity() {
        let err = Lot::create(
            LotId::generate(),
            NewLot {
                product_id: ProductId::new(),
                warehouse_id: WarehouseId::new(),
                quantity: -1,
                unit_cost: 1,
                received_at: test_time(),
                location: None,
                source_ref: None,
            },
            ActorId::new(),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn adjust_quantity_refuses_to_go_negative() {
        let mut lot = test_lot(5);
        let err = lot.adjust_quantity(-6).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
        assert_eq!(lot.quantity(), 5);

        lot.adjust_quantity(-5).unwrap();
        assert_eq!(lot.quantity(), 0);
        assert!(!lot.is_available());
    }

    #[test]
    fn relocate_keeps_identity_and_clears_location() {
        let mut lot = test_lot(5);
        let id = lot.id_typed();
        let target = WarehouseId::new();

        lot.relocate(target).unwrap();

        assert_eq!(lot.id_typed(), id);
        assert_eq!(lot.warehouse_id(), target);
        assert_eq!(lot.location(), None);
        assert_eq!(lot.quantity(), 5);
    }

    #[test]
    fn split_moves_quantity_into_child_with_lineage() {
        let mut lot = test_lot(10);
        let child = lot.split(4, LotId::generate(), ActorId::new(), Utc::now()).unwrap();

        assert_eq!(lot.quantity(), 6);
        assert_eq!(child.quantity(), 4);
        assert_eq!(child.parent_lot_id(), Some(lot.id_typed()));
        assert_eq!(child.received_at(), lot.received_at());
        assert_eq!(child.unit_cost(), lot.unit_cost());
        assert_eq!(child.warehouse_id(), lot.warehouse_id());
    }

    #[test]
    fn split_cannot_exceed_quantity() {
        let mut lot = test_lot(3);
        let err = lot.split(4, LotId::generate(), ActorId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
        assert_eq!(lot.quantity(), 3);
    }

    #[test]
    fn retire_requires_empty_lot_and_blocks_further_changes() {
        let mut lot = test_lot(2);
        assert!(matches!(lot.retire(), Err(DomainError::Validation(_))));

        lot.adjust_quantity(-2).unwrap();
        lot.retire().unwrap();
        assert_eq!(lot.status(), LotStatus::Deleted);

        let err = lot.adjust_quantity(1).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn derived_lot_copies_cost_and_points_to_reference() {
        let reference = test_lot(10);
        let incidents = WarehouseId::new();
        let lot = Lot::derived_from(
            LotId::generate(),
            &reference,
            incidents,
            5,
            None,
            ActorId::new(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(lot.product_id(), reference.product_id());
        assert_eq!(lot.unit_cost(), reference.unit_cost());
        assert_eq!(lot.parent_lot_id(), Some(reference.id_typed()));
        assert_eq!(lot.warehouse_id(), incidents);
    }
}
