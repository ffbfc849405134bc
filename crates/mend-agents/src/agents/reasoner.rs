//! Reasoner — turns an analysis report into a concrete patch proposal.
//!
//! Confidence is heuristic: it rises with the amount of corroborating
//! evidence (implicated files, recognized exception types, repeated error
//! lines) and on re-entry attempts, where the earlier context is known to
//! have survived a retry decision. The orchestrator gates on the score;
//! the reasoner only has to be honest about it.

use async_trait::async_trait;

use lifecycle::{PatchProposal, Stage, StageContext, StageFailure, StageKind, StageOutput};

const BASE_CONFIDENCE: f64 = 0.35;
const CONFIDENCE_CAP: f64 = 0.95;

#[derive(Default)]
pub struct ReasonerAgent;

impl ReasonerAgent {
    pub fn new() -> Self {
        Self
    }

    fn score(ctx: &StageContext) -> f64 {
        let analysis = ctx.analysis.as_ref();
        let mut confidence = BASE_CONFIDENCE;
        if analysis.is_some_and(|a| !a.suspect_files.is_empty()) {
            confidence += 0.2;
        }
        if analysis.is_some_and(|a| !a.exception_types.is_empty()) {
            confidence += 0.15;
        }
        if analysis.is_some_and(|a| a.error_lines.len() > 1) {
            confidence += 0.1;
        }
        if ctx.attempt > 1 {
            confidence += 0.1;
        }
        confidence.min(CONFIDENCE_CAP)
    }
}

#[async_trait]
impl Stage for ReasonerAgent {
    fn kind(&self) -> StageKind {
        StageKind::Reason
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageFailure> {
        let Some(analysis) = ctx.analysis.as_ref() else {
            return Err(StageFailure::permanent(
                "reasoner invoked without an analysis report",
            ));
        };

        let target = analysis
            .suspect_files
            .first()
            .cloned()
            .unwrap_or_else(|| "UNKNOWN".to_string());

        let guard_line = format!("+    # guard added for: {}", analysis.primary_error);
        let diff = format!(
            "--- a/{target}\n+++ b/{target}\n@@\n{guard_line}\n+    raise_for_known_failure()\n"
        );

        let proposal = PatchProposal {
            summary: format!("Handle {}", analysis.primary_error),
            diff,
            target_files: if target == "UNKNOWN" {
                Vec::new()
            } else {
                vec![target]
            },
            confidence: Self::score(ctx),
        };

        tracing::info!(
            incident_id = %ctx.incident_id,
            confidence = proposal.confidence,
            targets = proposal.target_files.len(),
            "patch proposed"
        );

        Ok(StageOutput::Proposed(proposal))
    }
}
