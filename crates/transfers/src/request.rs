use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotflow_core::{ActorId, Aggregate, AggregateRoot, DomainError, ProductId, WarehouseId};
use lotflow_events::Event;
use lotflow_inventory::MovementId;

lotflow_core::aggregate_id!(
    /// Transfer request identifier.
    TransferId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Approved,
    Rejected,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: TransferRequest.
///
/// The requester warehouse asks the supplier warehouse for stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    id: TransferId,
    requester: WarehouseId,
    supplier: WarehouseId,
    lines: Vec<TransferLine>,
    state: TransferState,
    note: Option<String>,
    requested_by: Option<ActorId>,
    requested_at: Option<DateTime<Utc>>,
    decided_by: Option<ActorId>,
    decided_at: Option<DateTime<Utc>>,
    decision_note: Option<String>,
    outbound_movement: Option<MovementId>,
    inbound_movement: Option<MovementId>,
    escalated_from: Option<TransferId>,
    escalated_to: Option<TransferId>,
    version: u64,
    created: bool,
}

impl TransferRequest {
    /// Create an empty, not-yet-requested aggregate instance.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            requester: WarehouseId::from_uuid(Default::default()),
            supplier: WarehouseId::from_uuid(Default::default()),
            lines: Vec::new(),
            state: TransferState::Pending,
            note: None,
            requested_by: None,
            requested_at: None,
            decided_by: None,
            decided_at: None,
            decision_note: None,
            outbound_movement: None,
            inbound_movement: None,
            escalated_from: None,
            escalated_to: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn requester(&self) -> WarehouseId {
        self.requester
    }

    pub fn supplier(&self) -> WarehouseId {
        self.supplier
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn requested_by(&self) -> Option<ActorId> {
        self.requested_by
    }

    pub fn decided_by(&self) -> Option<ActorId> {
        self.decided_by
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        self.decided_at
    }

    pub fn decision_note(&self) -> Option<&str> {
        self.decision_note.as_deref()
    }

    pub fn outbound_movement(&self) -> Option<MovementId> {
        self.outbound_movement
    }

    pub fn inbound_movement(&self) -> Option<MovementId> {
        self.inbound_movement
    }

    pub fn escalated_from(&self) -> Option<TransferId> {
        self.escalated_from
    }

    /// Follow-up request filed against the central warehouse on rejection.
    pub fn escalated_to(&self) -> Option<TransferId> {
        self.escalated_to
    }

    /// Fails unless the request exists and is still PENDING.
    pub fn ensure_pending(&self, action: &'static str) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("transfer request {}", self.id)));
        }
        if self.state.is_terminal() {
            return Err(DomainError::invalid_transition("transfer request", self.state, action));
        }
        Ok(())
    }
}

impl AggregateRoot for TransferRequest {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransfer {
    pub transfer_id: TransferId,
    pub requester: WarehouseId,
    pub supplier: WarehouseId,
    pub lines: Vec<TransferLine>,
    pub note: Option<String>,
    pub actor: ActorId,
    pub escalated_from: Option<TransferId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveTransfer (stock already relocated by the caller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTransfer {
    pub transfer_id: TransferId,
    pub actor: ActorId,
    pub note: Option<String>,
    pub outbound_movement: MovementId,
    pub inbound_movement: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTransfer {
    pub transfer_id: TransferId,
    pub actor: ActorId,
    pub note: Option<String>,
    pub escalated_to: Option<TransferId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    RequestTransfer(RequestTransfer),
    ApproveTransfer(ApproveTransfer),
    RejectTransfer(RejectTransfer),
}

/// Event: TransferRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequested {
    pub transfer_id: TransferId,
    pub requester: WarehouseId,
    pub supplier: WarehouseId,
    pub lines: Vec<TransferLine>,
    pub note: Option<String>,
    pub actor: ActorId,
    pub escalated_from: Option<TransferId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub transfer_id: TransferId,
    pub actor: ActorId,
    pub note: Option<String>,
    pub outbound_movement: MovementId,
    pub inbound_movement: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRejected {
    pub transfer_id: TransferId,
    pub actor: ActorId,
    pub note: Option<String>,
    pub escalated_to: Option<TransferId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferRequested(TransferRequested),
    TransferApproved(TransferApproved),
    TransferRejected(TransferRejected),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferRequested(_) => "transfer.requested",
            TransferEvent::TransferApproved(_) => "transfer.approved",
            TransferEvent::TransferRejected(_) => "transfer.rejected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferRequested(e) => e.occurred_at,
            TransferEvent::TransferApproved(e) => e.occurred_at,
            TransferEvent::TransferRejected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TransferRequest {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferRequested(e) => {
                self.id = e.transfer_id;
                self.requester = e.requester;
                self.supplier = e.supplier;
                self.lines = e.lines.clone();
                self.note = e.note.clone();
                self.requested_by = Some(e.actor);
                self.requested_at = Some(e.occurred_at);
                self.escalated_from = e.escalated_from;
                self.state = TransferState::Pending;
                self.created = true;
            }
            TransferEvent::TransferApproved(e) => {
                self.state = TransferState::Approved;
                self.decided_by = Some(e.actor);
                self.decided_at = Some(e.occurred_at);
                self.decision_note = e.note.clone();
                self.outbound_movement = Some(e.outbound_movement);
                self.inbound_movement = Some(e.inbound_movement);
            }
            TransferEvent::TransferRejected(e) => {
                self.state = TransferState::Rejected;
                self.decided_by = Some(e.actor);
                self.decided_at = Some(e.occurred_at);
                self.decision_note = e.note.clone();
                self.escalated_to = e.escalated_to;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::RequestTransfer(cmd) => self.handle_request(cmd),
            TransferCommand::ApproveTransfer(cmd) => self.handle_approve(cmd),
            TransferCommand::RejectTransfer(cmd) => self.handle_reject(cmd),
        }
    }
}

impl TransferRequest {
    fn ensure_transfer_id(&self, transfer_id: TransferId) -> Result<(), DomainError> {
        if self.id != transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer request already exists"));
        }
        if cmd.requester == cmd.supplier {
            return Err(DomainError::validation(
                "requester and supplier warehouses must differ",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("transfer request needs at least one line"));
        }

        let mut seen = HashSet::new();
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation("transfer quantity must be positive"));
            }
            if !seen.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} appears on more than one line",
                    line.product_id
                )));
            }
        }

        Ok(vec![TransferEvent::TransferRequested(TransferRequested {
            transfer_id: cmd.transfer_id,
            requester: cmd.requester,
            supplier: cmd.supplier,
            lines: cmd.lines.clone(),
            note: cmd.note.clone(),
            actor: cmd.actor,
            escalated_from: cmd.escalated_from,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_pending("approve")?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        Ok(vec![TransferEvent::TransferApproved(TransferApproved {
            transfer_id: cmd.transfer_id,
            actor: cmd.actor,
            note: cmd.note.clone(),
            outbound_movement: cmd.outbound_movement,
            inbound_movement: cmd.inbound_movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_pending("reject")?;
        self.ensure_transfer_id(cmd.transfer_id)?;

        Ok(vec![TransferEvent::TransferRejected(TransferRejected {
            transfer_id: cmd.transfer_id,
            actor: cmd.actor,
            note: cmd.note.clone(),
            escalated_to: cmd.escalated_to,
            occurred_at: cmd.occurred_at,
        })])
    }
}
