//! Append-only per-incident event log.
//!
//! Replaying the timeline from `pending` through the transition table must
//! always reproduce the incident's cached `status`. To keep that invariant
//! checkable, `Timeline` exposes no mutation besides `push` — events are
//! never removed or reordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::IncidentState;

/// One immutable record in an incident's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// The state being entered (or, for informational events such as retry
    /// decisions, the state the incident was in when the event occurred).
    pub state: IncidentState,
    pub timestamp: DateTime<Utc>,
    /// Opaque key-value payload supplied by the stage or policy that
    /// produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Ordered, append-only sequence of [`TimelineEvent`]s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event for `state`, stamping it with the current time.
    ///
    /// Timestamps are kept monotonically non-decreasing per incident even
    /// if the wall clock steps backwards.
    pub fn push(&mut self, state: IncidentState, details: Option<serde_json::Value>) {
        let mut timestamp = Utc::now();
        if let Some(last) = self.events.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }
        self.events.push(TimelineEvent {
            state,
            timestamp,
            details,
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn last(&self) -> Option<&TimelineEvent> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
