//! Incident filing and resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use lotflow_core::{ActorId, Aggregate, DomainError, ProductId};
use lotflow_events::{EventBus, EventEnvelope};
use lotflow_incidents::{
    AttendIncidentLine, Incident, IncidentCommand, IncidentId, IncidentLineId, NewIncidentLine,
    ReportIncident,
};
use lotflow_inventory::{Lot, LotId, MovementKind, NewMovement};

use super::ledger::Draft;
use super::{InventoryEngine, found, locked_lot, require_warehouse};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::notify::Outbox;
use crate::store::{InventoryStore, StoreTx};

/// One reported discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentLineInput {
    pub product_id: ProductId,
    pub quantity_difference: i64,
    /// Lot the difference was observed against.
    pub reference_lot: LotId,
}

impl<S, B> InventoryEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn report_incident(
        &self,
        description: impl Into<String>,
        lines: Vec<IncidentLineInput>,
        actor: ActorId,
    ) -> EngineResult<Incident> {
        let description = description.into();
        self.transact("report_incident", |tx, outbox| {
            file_incident(tx, outbox, &self.config, description, &lines, actor, Utc::now())
        })
    }

    /// Mark one line attended. The incident resolves with its last open line.
    pub fn attend_incident_line(
        &self,
        line_id: IncidentLineId,
        note: Option<String>,
        actor: ActorId,
    ) -> EngineResult<Incident> {
        self.transact("attend_incident_line", |tx, outbox| {
            let incident_id = found(tx.incident_for_line(line_id)?, || {
                format!("incident line {line_id}")
            })?;
            let mut incident = found(tx.lock_incident(incident_id)?, || {
                format!("incident {incident_id}")
            })?;

            let events = incident.execute(&IncidentCommand::AttendIncidentLine(AttendIncidentLine {
                incident_id,
                line_id,
                note,
                actor,
                occurred_at: Utc::now(),
            }))?;
            tx.save_incident(incident.clone())?;
            outbox.record(actor, incident_id.0, "incident", &events);

            info!(
                %incident_id,
                %line_id,
                resolved = incident.is_resolved(),
                "incident line attended"
            );
            Ok(incident)
        })
    }
}

/// File an incident inside an open transaction.
///
/// Each line becomes a compensating lot in the incidents warehouse, derived
/// from its reference lot; all of them land on one incident-adjustment
/// movement.
pub(crate) fn file_incident<T: StoreTx>(
    tx: &mut T,
    outbox: &mut Outbox,
    config: &EngineConfig,
    description: String,
    lines: &[IncidentLineInput],
    actor: ActorId,
    at: DateTime<Utc>,
) -> EngineResult<Incident> {
    if lines.is_empty() {
        return Err(DomainError::validation("incident needs at least one line").into());
    }
    require_warehouse(tx, config.incidents_warehouse)?;

    let incident_id = IncidentId::generate();
    let mut draft = Draft::open(
        NewMovement {
            kind: MovementKind::IncidentAdjustment,
            source_warehouse: config.incidents_warehouse,
            destination_warehouse: None,
            reference: Some(format!("incident {incident_id}")),
            note: Some(description.clone()),
        },
        actor,
        at,
    )?;

    let mut new_lines = Vec::with_capacity(lines.len());
    for input in lines {
        if input.quantity_difference <= 0 {
            return Err(DomainError::validation("quantity difference must be positive").into());
        }
        let reference = locked_lot(tx, input.reference_lot)?;
        if reference.product_id() != input.product_id {
            return Err(DomainError::validation(format!(
                "reference lot {} holds product {}, not {}",
                input.reference_lot,
                reference.product_id(),
                input.product_id
            ))
            .into());
        }

        let compensating = Lot::derived_from(
            LotId::generate(),
            &reference,
            config.incidents_warehouse,
            input.quantity_difference,
            Some(format!("incident {incident_id}")),
            actor,
            at,
        )?;
        draft.record(&compensating, input.quantity_difference)?;
        tx.insert_lot(compensating.clone())?;

        new_lines.push(NewIncidentLine {
            line_id: IncidentLineId::generate(),
            product_id: input.product_id,
            lot_id: compensating.id_typed(),
            reference_lot: input.reference_lot,
            quantity_difference: input.quantity_difference,
        });
    }

    let mut incident = Incident::empty(incident_id);
    let events = incident.execute(&IncidentCommand::ReportIncident(ReportIncident {
        incident_id,
        description,
        lines: new_lines,
        adjustment_movement: Some(draft.id()),
        actor,
        occurred_at: at,
    }))?;
    let (movement, _) = draft.finish(tx)?;
    tx.save_incident(incident.clone())?;
    outbox.record(actor, incident_id.0, "incident", &events);

    info!(
        %incident_id,
        lines = incident.lines().len(),
        movement_id = %movement.id_typed(),
        "incident reported"
    );
    Ok(incident)
}
