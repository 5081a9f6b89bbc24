use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotflow_core::{ActorId, Aggregate, AggregateRoot, DomainError, ProductId};
use lotflow_events::Event;
use lotflow_inventory::{LotId, MovementId};

lotflow_core::aggregate_id!(
    /// Incident identifier.
    IncidentId
);

lotflow_core::aggregate_id!(
    /// Incident line identifier.
    IncidentLineId
);

/// One discrepancy, backed by a compensating lot in the incidents warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentLine {
    pub id: IncidentLineId,
    pub product_id: ProductId,
    /// Compensating lot holding `quantity_difference` units.
    pub lot_id: LotId,
    /// Lot the discrepancy was found against.
    pub reference_lot: LotId,
    pub quantity_difference: i64,
    pub attended: bool,
    pub attended_note: Option<String>,
    pub attended_at: Option<DateTime<Utc>>,
    pub attended_by: Option<ActorId>,
}

/// Input line for `ReportIncident`; the compensating lot already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIncidentLine {
    pub line_id: IncidentLineId,
    pub product_id: ProductId,
    pub lot_id: LotId,
    pub reference_lot: LotId,
    pub quantity_difference: i64,
}

/// Aggregate root: Incident.
///
/// `resolved` is true only when every line is attended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    id: IncidentId,
    description: String,
    lines: Vec<IncidentLine>,
    resolved: bool,
    adjustment_movement: Option<MovementId>,
    created_by: Option<ActorId>,
    created_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Incident {
    /// Create an empty, not-yet-reported aggregate instance.
    pub fn empty(id: IncidentId) -> Self {
        Self {
            id,
            description: String::new(),
            lines: Vec::new(),
            resolved: false,
            adjustment_movement: None,
            created_by: None,
            created_at: None,
            resolved_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> IncidentId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn lines(&self) -> &[IncidentLine] {
        &self.lines
    }

    pub fn line(&self, line_id: IncidentLineId) -> Option<&IncidentLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn adjustment_movement(&self) -> Option<MovementId> {
        self.adjustment_movement
    }

    pub fn created_by(&self) -> Option<ActorId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }
}

impl AggregateRoot for Incident {
    type Id = IncidentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReportIncident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportIncident {
    pub incident_id: IncidentId,
    pub description: String,
    pub lines: Vec<NewIncidentLine>,
    pub adjustment_movement: Option<MovementId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttendIncidentLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendIncidentLine {
    pub incident_id: IncidentId,
    pub line_id: IncidentLineId,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentCommand {
    ReportIncident(ReportIncident),
    AttendIncidentLine(AttendIncidentLine),
}

/// Event: IncidentReported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentReported {
    pub incident_id: IncidentId,
    pub description: String,
    pub lines: Vec<IncidentLine>,
    pub adjustment_movement: Option<MovementId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: IncidentLineAttended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentLineAttended {
    pub incident_id: IncidentId,
    pub line_id: IncidentLineId,
    pub note: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: IncidentResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentResolved {
    pub incident_id: IncidentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentEvent {
    IncidentReported(IncidentReported),
    IncidentLineAttended(IncidentLineAttended),
    IncidentResolved(IncidentResolved),
}

impl Event for IncidentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            IncidentEvent::IncidentReported(_) => "incident.reported",
            IncidentEvent::IncidentLineAttended(_) => "incident.line_attended",
            IncidentEvent::IncidentResolved(_) => "incident.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            IncidentEvent::IncidentReported(e) => e.occurred_at,
            IncidentEvent::IncidentLineAttended(e) => e.occurred_at,
            IncidentEvent::IncidentResolved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Incident {
    type Command = IncidentCommand;
    type Event = IncidentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            IncidentEvent::IncidentReported(e) => {
                self.id = e.incident_id;
                self.description = e.description.clone();
                self.lines = e.lines.clone();
                self.adjustment_movement = e.adjustment_movement;
                self.created_by = Some(e.actor);
                self.created_at = Some(e.occurred_at);
                self.resolved = false;
                self.created = true;
            }
            IncidentEvent::IncidentLineAttended(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.id == e.line_id) {
                    line.attended = true;
                    line.attended_note = e.note.clone();
                    line.attended_at = Some(e.occurred_at);
                    line.attended_by = Some(e.actor);
                }
                self.resolved = self.lines.iter().all(|l| l.attended);
            }
            IncidentEvent::IncidentResolved(e) => {
                self.resolved = true;
                self.resolved_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            IncidentCommand::ReportIncident(cmd) => self.handle_report(cmd),
            IncidentCommand::AttendIncidentLine(cmd) => self.handle_attend(cmd),
        }
    }
}

impl Incident {
    fn handle_report(&self, cmd: &ReportIncident) -> Result<Vec<IncidentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("incident already exists"));
        }
        if cmd.description.trim().is_empty() {
            return Err(DomainError::validation("incident description cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("incident needs at least one line"));
        }
        if cmd.lines.iter().any(|l| l.quantity_difference <= 0) {
            return Err(DomainError::validation("quantity difference must be positive"));
        }

        let lines = cmd
            .lines
            .iter()
            .map(|l| IncidentLine {
                id: l.line_id,
                product_id: l.product_id,
                lot_id: l.lot_id,
                reference_lot: l.reference_lot,
                quantity_difference: l.quantity_difference,
                attended: false,
                attended_note: None,
                attended_at: None,
                attended_by: None,
            })
            .collect();

        Ok(vec![IncidentEvent::IncidentReported(IncidentReported {
            incident_id: cmd.incident_id,
            description: cmd.description.trim().to_string(),
            lines,
            adjustment_movement: cmd.adjustment_movement,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attend(&self, cmd: &AttendIncidentLine) -> Result<Vec<IncidentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("incident {}", self.id)));
        }
        let line = self
            .line(cmd.line_id)
            .ok_or_else(|| DomainError::not_found(format!("incident line {}", cmd.line_id)))?;
        if line.attended {
            return Err(DomainError::invalid_transition(
                "incident line",
                "attended",
                "attend",
            ));
        }

        let mut events = vec![IncidentEvent::IncidentLineAttended(IncidentLineAttended {
            incident_id: self.id,
            line_id: cmd.line_id,
            note: cmd.note.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })];

        let last_open = self
            .lines
            .iter()
            .filter(|l| l.id != cmd.line_id)
            .all(|l| l.attended);
        if last_open {
            events.push(IncidentEvent::IncidentResolved(IncidentResolved {
                incident_id: self.id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }
}
