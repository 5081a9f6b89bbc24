//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Lots, movements and shipments are entities: they keep their identity while
/// quantities, warehouses and phases change around them.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
