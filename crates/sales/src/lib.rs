//! Sales-order collaborator.
//!
//! The engine does not own orders; it reads their lines and writes the
//! per-line loaded/delivered flags plus the order-level status derived from
//! them.

pub mod order;

pub use order::{
    CreateSalesOrder, LineDelivered, LineLoaded, NewOrderLine, OrderLine, RecordDelivery,
    RecordLoading, SalesOrder, SalesOrderCommand, SalesOrderCreated, SalesOrderEvent,
    SalesOrderId, SalesOrderStatus,
};
