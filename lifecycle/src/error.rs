//! Failure taxonomy and lifecycle errors.
//!
//! Stage-level failures never cross the orchestrator boundary as raw
//! errors — every failure is converted to a [`StageFailure`] before it
//! reaches state-machine logic, and only `error_message` plus the `failed`
//! state token surface to end users. Raw detail stays in timeline event
//! `details` for operator inspection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::{IncidentState, TransitionError};

/// How a stage failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Time-bounded infrastructure hiccup (timeout, provisioning error,
    /// rate limit). Auto-retried up to the attempt budget.
    Transient,
    /// The stage technically succeeded but the result failed a correctness
    /// gate (low confidence, failed verification, sanitizer policy halt).
    /// Retried automatically at most once.
    Semantic,
    /// Invalid input or unrecoverable external rejection. Never retried
    /// automatically.
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Semantic => write!(f, "semantic"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Typed failure returned by a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    /// Human-readable reason. This is what ends up in `error_message` if
    /// the failure becomes terminal.
    pub reason: String,
    /// Internal diagnostic payload, retained only in the timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl StageFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn semantic(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Semantic,
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.reason)
    }
}

/// Errors surfaced by the orchestrator and store.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// An illegal transition was requested — an internal defect, not a
    /// runtime condition to recover from.
    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),

    #[error("incident {0} not found")]
    NotFound(Uuid),

    #[error("incident {0} already exists")]
    AlreadyExists(Uuid),

    /// A second execution was attempted while one is active. Rejected
    /// synchronously; never recorded as a pipeline failure.
    #[error("an execution is already active for incident {0}")]
    ExecutionActive(Uuid),

    #[error("incident {id} cannot start from state {state}")]
    NotStartable { id: Uuid, state: IncidentState },

    #[error("retry is only valid from failed, incident {id} is {state}")]
    InvalidRetry { id: Uuid, state: IncidentState },

    #[error("pipeline misconfigured: {0}")]
    Misconfigured(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&FailureKind::Transient).unwrap(),
            "\"transient\""
        );
        assert_eq!(
            serde_json::to_string(&FailureKind::Semantic).unwrap(),
            "\"semantic\""
        );
    }

    #[test]
    fn stage_failure_display_includes_kind_and_reason() {
        let failure = StageFailure::transient("sandbox provisioning timed out");
        assert_eq!(
            failure.to_string(),
            "transient failure: sandbox provisioning timed out"
        );
    }
}
