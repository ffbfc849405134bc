//! The stage contract — the uniform interface every remediation agent
//! implements.
//!
//! A stage consumes a narrow [`StageContext`] (repository reference plus
//! the prior outputs relevant to it) and returns either a typed success
//! payload or a [`StageFailure`]. Stages never touch the incident record;
//! only the orchestrator commits results, through the state machine, to
//! the timeline. The orchestrator wraps every invocation in a timeout, so
//! implementations must treat blocking collaborator calls as cooperative
//! waits rather than relying on being killed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StageFailure;
use crate::incident::RepositoryInfo;
use crate::state_machine::IncidentState;

/// Position in the fixed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Sanitize,
    Analyze,
    Reason,
    Verify,
    Publish,
}

impl StageKind {
    /// The only forward order. Dispatch is by pipeline position, never by
    /// runtime type inspection.
    pub const SEQUENCE: [StageKind; 5] = [
        StageKind::Sanitize,
        StageKind::Analyze,
        StageKind::Reason,
        StageKind::Verify,
        StageKind::Publish,
    ];

    /// Incident state entered while this stage runs.
    pub fn state(self) -> IncidentState {
        match self {
            Self::Sanitize => IncidentState::Sanitizing,
            Self::Analyze => IncidentState::Analyzing,
            Self::Reason => IncidentState::Reasoning,
            Self::Verify => IncidentState::Verifying,
            Self::Publish => IncidentState::CreatingPr,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sanitize => "sanitize",
            Self::Analyze => "analyze",
            Self::Reason => "reason",
            Self::Verify => "verify",
            Self::Publish => "publish",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sanitizer output: what was found and the redacted input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizeReport {
    pub secrets_found: u32,
    /// Logs with every detected secret replaced by a placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_logs: Option<String>,
    /// Policy gate tripped: the input is judged unsafe to process further.
    pub halted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
}

/// Detective output: distilled failure evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// The headline error the pipeline is trying to fix.
    pub primary_error: String,
    pub error_lines: Vec<String>,
    pub exception_types: Vec<String>,
    /// Files implicated by stack frames or error locations.
    pub suspect_files: Vec<String>,
}

/// Reasoner output: a candidate fix with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchProposal {
    pub summary: String,
    pub diff: String,
    pub target_files: Vec<String>,
    /// Correctness gate input, 0.0–1.0. Proposals below the configured
    /// threshold are treated as semantic failures.
    pub confidence: f64,
}

/// Verifier output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub checks_run: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

/// Publisher output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub url: String,
    pub branch: String,
    pub title: String,
}

/// Success payload of one stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    Sanitized(SanitizeReport),
    Analyzed(AnalysisReport),
    Proposed(PatchProposal),
    Verified(VerificationReport),
    Published(PullRequestInfo),
}

/// The minimum context a stage receives. Later stages see the outputs of
/// earlier ones; nothing here grants access to the timeline or the state
/// machine.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub incident_id: Uuid,
    pub repository: RepositoryInfo,
    /// Raw logs as submitted (sanitizer input). Later stages should prefer
    /// `sanitized.redacted_logs`.
    pub logs: Option<String>,
    /// Pipeline attempt currently running (1-indexed). Stages may adjust
    /// their parameters on re-entry.
    pub attempt: u32,
    pub sanitized: Option<SanitizeReport>,
    pub analysis: Option<AnalysisReport>,
    pub proposal: Option<PatchProposal>,
    pub verification: Option<VerificationReport>,
}

impl StageContext {
    pub fn new(incident_id: Uuid, repository: RepositoryInfo, logs: Option<String>) -> Self {
        Self {
            incident_id,
            repository,
            logs,
            attempt: 1,
            sanitized: None,
            analysis: None,
            proposal: None,
            verification: None,
        }
    }

    /// Logs a post-sanitizer stage should read: redacted if available,
    /// otherwise the raw input.
    pub fn effective_logs(&self) -> Option<&str> {
        self.sanitized
            .as_ref()
            .and_then(|s| s.redacted_logs.as_deref())
            .or(self.logs.as_deref())
    }

    /// Fold a stage's success payload into the context for the stages
    /// after it.
    pub fn absorb(&mut self, output: &StageOutput) {
        match output {
            StageOutput::Sanitized(r) => self.sanitized = Some(r.clone()),
            StageOutput::Analyzed(r) => self.analysis = Some(r.clone()),
            StageOutput::Proposed(p) => self.proposal = Some(p.clone()),
            StageOutput::Verified(v) => self.verification = Some(v.clone()),
            StageOutput::Published(_) => {}
        }
    }
}

/// Capability every agent implements: consume incident context, produce a
/// stage result or a typed failure, never hang the orchestrator.
///
/// Implementations must be side-effect-idempotent with respect to the
/// lifecycle engine — running twice for the same attempt must not corrupt
/// shared state.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_states_follow_the_forward_path() {
        let states: Vec<IncidentState> =
            StageKind::SEQUENCE.iter().map(|k| k.state()).collect();
        assert_eq!(
            states,
            vec![
                IncidentState::Sanitizing,
                IncidentState::Analyzing,
                IncidentState::Reasoning,
                IncidentState::Verifying,
                IncidentState::CreatingPr,
            ]
        );
    }

    #[test]
    fn effective_logs_prefers_redacted() {
        let mut ctx = StageContext::new(
            Uuid::new_v4(),
            RepositoryInfo::new("https://github.com/acme/payments"),
            Some("password=hunter2".into()),
        );
        assert_eq!(ctx.effective_logs(), Some("password=hunter2"));

        ctx.absorb(&StageOutput::Sanitized(SanitizeReport {
            secrets_found: 1,
            redacted_logs: Some("password=[REDACTED]".into()),
            halted: false,
            halt_reason: None,
        }));
        assert_eq!(ctx.effective_logs(), Some("password=[REDACTED]"));
    }

    #[test]
    fn stage_output_tags_by_stage() {
        let json = serde_json::to_value(StageOutput::Verified(VerificationReport {
            passed: true,
            checks_run: vec!["patch_format".into()],
            failure_detail: None,
        }))
        .unwrap();
        assert_eq!(json["stage"], "verified");
        assert_eq!(json["passed"], true);
    }
}
