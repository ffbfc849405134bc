//! Incident state machine — explicit states and legal transition guards.
//!
//! Every mutation of an incident's `status`, `timeline`, or derived fields
//! goes through [`StateMachine::advance`]; no other component writes them.
//! Each call validates the transition against the table below, appends the
//! matching [`TimelineEvent`](crate::timeline::TimelineEvent), and applies
//! any derived-field effects in the same commit, so readers never observe
//! a state value without its timeline entry.
//!
//! The forward path (taken one step per stage success):
//!
//! ```text
//! pending → processing → sanitizing → analyzing → reasoning
//!         → verifying → creating_pr → pr_created
//! ```
//!
//! `completed` is the alternate successful terminus when no PR step is
//! required (dry run / no-op fix). Any active state may drop to `failed`
//! (unrecoverable) or `retrying` (recoverable); `retrying → processing`
//! re-enters the pipeline from the top. `failed → retrying` exists only
//! for explicit external retry requests.

use serde::{Deserialize, Serialize};

use crate::incident::Incident;
use crate::timeline::Timeline;

/// The set of incident states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    /// Created, not yet picked up by the orchestrator.
    Pending,
    /// Pipeline attempt starting (context assembly, repo checkout).
    Processing,
    /// Sanitizer redacting secrets from the input.
    Sanitizing,
    /// Detective analysing logs and failure evidence.
    Analyzing,
    /// Reasoner generating a candidate patch.
    Reasoning,
    /// Verifier checking the candidate patch.
    Verifying,
    /// Publisher opening a pull request.
    CreatingPr,
    /// Pull request opened — terminal success.
    PrCreated,
    /// Finished without a PR step — terminal success.
    Completed,
    /// Permanent failure (until an external retry request).
    Failed,
    /// Recoverable failure acknowledged; about to re-enter the pipeline.
    Retrying,
}

impl IncidentState {
    /// Whether this state denotes a finished pipeline. `failed` counts as
    /// terminal here — only an explicit external retry leaves it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PrCreated | Self::Completed | Self::Failed)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::PrCreated | Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sanitizing => "sanitizing",
            Self::Analyzing => "analyzing",
            Self::Reasoning => "reasoning",
            Self::Verifying => "verifying",
            Self::CreatingPr => "creating_pr",
            Self::PrCreated => "pr_created",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legal transitions between incident states.
fn is_legal_transition(from: IncidentState, to: IncidentState) -> bool {
    use IncidentState::*;

    // Any non-terminal state can fail.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    // Recoverable failure: active states drop to Retrying. Failed reaches
    // Retrying only through an explicit external retry request.
    if to == Retrying {
        return matches!(
            from,
            Processing | Sanitizing | Analyzing | Reasoning | Verifying | CreatingPr | Failed
        );
    }

    matches!(
        (from, to),
        (Pending, Processing)
            | (Retrying, Processing)
            | (Processing, Sanitizing)
            | (Sanitizing, Analyzing)
            | (Analyzing, Reasoning)
            | (Reasoning, Verifying)
            | (Verifying, CreatingPr)
            // Dry run / no-op fix: skip the PR step entirely.
            | (Verifying, Completed)
            | (CreatingPr, PrCreated)
    )
}

/// Error returned when an illegal transition is requested. This indicates
/// an orchestrator bug; callers abort rather than recover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: IncidentState,
    pub to: IncidentState,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Derived-field mutation applied atomically with a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// A new pipeline attempt is starting (sets the attempt counter).
    BeginAttempt(u32),
    /// One semantic retry was spent.
    SemanticRetryUsed,
    /// The reasoner produced a patch artifact (counted even when the
    /// confidence gate rejects it).
    PatchGenerated,
    /// Verifier outcome for the latest patch.
    Verified(bool),
    /// Publisher opened a pull request. Set exactly once.
    PullRequest(String),
    /// Terminal-failure explanation shown to users.
    ErrorMessage(String),
    /// A retry restart clears the previous failure explanation.
    ClearError,
    /// A manual retry starts a fresh run with a full semantic budget.
    ResetSemanticRetries,
}

/// The sole mutation authority over incident state.
pub struct StateMachine;

impl StateMachine {
    /// Validate and apply a transition: set `status`, append the timeline
    /// event, and apply `effects`, all in one commit.
    pub fn advance(
        incident: &mut Incident,
        to: IncidentState,
        details: Option<serde_json::Value>,
        effects: Vec<Effect>,
    ) -> Result<(), TransitionError> {
        let from = incident.status;
        if !is_legal_transition(from, to) {
            return Err(TransitionError { from, to });
        }

        incident.status = to;
        incident.timeline.push(to, details);
        for effect in effects {
            Self::apply_effect(incident, effect);
        }
        incident.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Append an informational event at the current state without
    /// transitioning (used for retry-decision records, which the audit
    /// trail keeps distinct from the failure events themselves).
    pub fn record(incident: &mut Incident, details: serde_json::Value) {
        incident.timeline.push(incident.status, Some(details));
        incident.updated_at = chrono::Utc::now();
    }

    fn apply_effect(incident: &mut Incident, effect: Effect) {
        match effect {
            Effect::BeginAttempt(n) => incident.attempt = n,
            Effect::SemanticRetryUsed => incident.semantic_retries += 1,
            Effect::PatchGenerated => incident.patches_generated += 1,
            Effect::Verified(passed) => incident.latest_patch_verified = Some(passed),
            Effect::PullRequest(url) => {
                // pr_url is immutable once set.
                if incident.pr_url.is_none() {
                    incident.pr_url = Some(url);
                }
            }
            Effect::ErrorMessage(message) => incident.error_message = Some(message),
            Effect::ClearError => incident.error_message = None,
            Effect::ResetSemanticRetries => incident.semantic_retries = 0,
        }
    }

    /// Reconstruct the state implied by a timeline, starting from
    /// `pending`. Informational events (same state as current) are skipped;
    /// any other event must be a legal transition.
    ///
    /// The core invariant: for every reachable incident,
    /// `incident.status == replay(&incident.timeline)`.
    pub fn replay(timeline: &Timeline) -> Result<IncidentState, TransitionError> {
        let mut state = IncidentState::Pending;
        for event in timeline.events() {
            if event.state == state {
                continue;
            }
            if !is_legal_transition(state, event.state) {
                return Err(TransitionError {
                    from: state,
                    to: event.state,
                });
            }
            state = event.state;
        }
        Ok(state)
    }
}
