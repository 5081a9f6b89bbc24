//! Quantity discrepancies recorded as first-class, resolvable incidents.

pub mod incident;

pub use incident::{
    AttendIncidentLine, Incident, IncidentCommand, IncidentEvent, IncidentId, IncidentLine,
    IncidentLineAttended, IncidentLineId, IncidentReported, IncidentResolved, NewIncidentLine,
    ReportIncident,
};
