//! Reference directory records (products, warehouses, routes).
//!
//! The directory is owned by an external collaborator; the engine only reads
//! it, apart from the explicit bootstrap routine that registers the system
//! warehouses.

use serde::{Deserialize, Serialize};

use lotflow_core::{DomainError, DomainResult, ProductId, RouteId, WarehouseId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub default_unit: String,
    /// Shelf life after ingress, if the product expires.
    pub expiry_hours: Option<u32>,
}

impl Product {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if self.default_unit.trim().is_empty() {
            return Err(DomainError::validation("product unit cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub is_distribution_center: bool,
}

impl Warehouse {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty"));
        }
        Ok(())
    }
}

/// Delivery route. Undelivered stock goes back to its open tara warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    pub open_tara_warehouse: WarehouseId,
}

impl Route {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("route name cannot be empty"));
        }
        Ok(())
    }
}
