//! Warehouse-to-warehouse transfer requests.
//!
//! The request is a small state machine (PENDING → APPROVED | REJECTED). The
//! stock relocation that accompanies an approval is performed by the infra
//! layer inside the same transaction that applies `ApproveTransfer`.

pub mod request;

pub use request::{
    ApproveTransfer, RejectTransfer, RequestTransfer, TransferApproved, TransferCommand,
    TransferEvent, TransferId, TransferLine, TransferRejected, TransferRequest, TransferRequested,
    TransferState,
};
