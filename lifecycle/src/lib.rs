//! Incident remediation lifecycle.
//!
//! This library contains the engine that drives a single incident through
//! the fixed remediation pipeline (sanitize → analyze → reason → verify →
//! publish):
//!
//! - [`state_machine`] — legal incident states and validated transitions.
//! - [`timeline`] — the append-only per-incident event log. The timeline is
//!   the source of truth; `Incident::status` is a cached projection of it.
//! - [`stage`] — the uniform contract every remediation agent implements.
//! - [`retry`] — the policy deciding whether a failed attempt re-enters the
//!   pipeline, waits for a human, or terminates.
//! - [`orchestrator`] — sequential stage execution with at-most-one active
//!   run per incident.
//! - [`projector`] — the read-only status view served to polling clients.
//!
//! Concrete agents (secret redaction, log analysis, patch generation,
//! sandbox verification, PR creation) live in the `mend-agents` crate and
//! plug in through the [`stage::Stage`] trait.

pub mod config;
pub mod error;
pub mod incident;
pub mod orchestrator;
pub mod projector;
pub mod retry;
pub mod stage;
pub mod state_machine;
pub mod store;
pub mod timeline;

pub use config::PipelineConfig;
pub use error::{FailureKind, LifecycleError, StageFailure};
pub use incident::{Incident, IncidentMetadata, NewIncident, RepositoryInfo, Severity, Source};
pub use orchestrator::Orchestrator;
pub use projector::{project, StatusProjection};
pub use retry::{RetryDecision, RetryPolicy};
pub use stage::{
    AnalysisReport, PatchProposal, PullRequestInfo, SanitizeReport, Stage, StageContext,
    StageKind, StageOutput, VerificationReport,
};
pub use state_machine::{Effect, IncidentState, StateMachine, TransitionError};
pub use store::{ExecutionGuard, ExecutionPermit, IncidentStore, MemoryStore};
pub use timeline::{Timeline, TimelineEvent};
