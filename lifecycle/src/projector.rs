//! Status projection — the read-only view served to polling clients.
//!
//! A pure function over an incident record: no side effects, safe to call
//! concurrently with an in-flight execution. Consistency comes from the
//! store, which hands out whole-record snapshots; a projection can never
//! mix a state value with a timeline that lacks the matching event.

use serde::Serialize;
use uuid::Uuid;

use crate::incident::Incident;
use crate::state_machine::IncidentState;
use crate::timeline::TimelineEvent;

/// The client-facing status object, polled every few seconds by UIs.
#[derive(Debug, Clone, Serialize)]
pub struct StatusProjection {
    pub incident_id: Uuid,
    pub status: IncidentState,
    /// State token of the most recent timeline event; null before the
    /// orchestrator has picked the incident up.
    pub current_state: Option<IncidentState>,
    pub timeline: Vec<TimelineEvent>,
    pub patches_generated: u32,
    pub latest_patch_verified: Option<bool>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
}

/// Derive the status projection from an incident snapshot.
pub fn project(incident: &Incident) -> StatusProjection {
    StatusProjection {
        incident_id: incident.id,
        status: incident.status,
        current_state: incident.current_state(),
        timeline: incident.timeline.events().to_vec(),
        patches_generated: incident.patches_generated,
        latest_patch_verified: incident.latest_patch_verified,
        pr_url: incident.pr_url.clone(),
        error_message: incident.error_message.clone(),
    }
}
