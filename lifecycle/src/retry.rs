//! Retry policy — decides whether a failed attempt re-enters the pipeline.
//!
//! Every decision is appended to the timeline as its own event, distinct
//! from the failure event, so the audit trail records *why* a retry was or
//! wasn't attempted.

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, StageFailure};
use crate::state_machine::IncidentState;

/// Outcome of consulting the policy after a stage failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "retry_decision", rename_all = "snake_case")]
pub enum RetryDecision {
    /// Re-enter the pipeline from the top (`retrying → processing`).
    Restart {
        next_attempt: u32,
        reason: String,
    },
    /// Finalize as permanently failed; further retries require a human.
    GiveUp {
        reason: String,
    },
}

impl RetryDecision {
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::Restart { .. })
    }
}

/// Policy constants. Configurable through
/// [`PipelineConfig`](crate::config::PipelineConfig) rather than
/// hard-coded.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempt budget for transient failures, per run. A manual retry
    /// starts a fresh run with the full budget.
    pub max_attempts: u32,
    /// Budget for semantic failures (correctness gates): exactly one
    /// automatic re-run with adjusted parameters.
    pub max_semantic_retries: u32,
}

impl RetryPolicy {
    /// `attempt` and `semantic_retries_used` count from the start of the
    /// current run, so a human-initiated retry is judged against fresh
    /// budgets rather than the previous run's spend.
    pub fn decide(
        &self,
        failing_state: IncidentState,
        failure: &StageFailure,
        attempt: u32,
        semantic_retries_used: u32,
    ) -> RetryDecision {
        match failure.kind {
            FailureKind::Permanent => RetryDecision::GiveUp {
                reason: format!(
                    "permanent failure in {failing_state}: {} (no automatic retry)",
                    failure.reason
                ),
            },
            FailureKind::Transient => {
                if attempt < self.max_attempts {
                    RetryDecision::Restart {
                        next_attempt: attempt + 1,
                        reason: format!(
                            "transient failure in {failing_state}: {} (attempt {attempt} of {})",
                            failure.reason, self.max_attempts
                        ),
                    }
                } else {
                    RetryDecision::GiveUp {
                        reason: format!(
                            "transient failure in {failing_state}: {} (attempt budget {} exhausted)",
                            failure.reason, self.max_attempts
                        ),
                    }
                }
            }
            FailureKind::Semantic => {
                if semantic_retries_used < self.max_semantic_retries {
                    RetryDecision::Restart {
                        next_attempt: attempt + 1,
                        reason: format!(
                            "semantic failure in {failing_state}: {} (one adjusted re-run allowed)",
                            failure.reason
                        ),
                    }
                } else {
                    RetryDecision::GiveUp {
                        reason: format!(
                            "semantic failure in {failing_state}: {} (semantic retry already spent)",
                            failure.reason
                        ),
                    }
                }
            }
        }
    }
}
