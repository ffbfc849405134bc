//! Verifier — structural checks on the proposed patch before anything is
//! published. No sandbox here; the checks are cheap format and targeting
//! validations, but a failing one still produces an honest
//! [`VerificationReport`] for the correctness gate to act on.

use async_trait::async_trait;

use lifecycle::{
    PatchProposal, Stage, StageContext, StageFailure, StageKind, StageOutput, VerificationReport,
};

#[derive(Default)]
pub struct VerifierAgent;

impl VerifierAgent {
    pub fn new() -> Self {
        Self
    }

    fn run_checks(ctx: &StageContext, proposal: &PatchProposal) -> VerificationReport {
        let mut checks_run = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        checks_run.push("diff_nonempty".to_string());
        if proposal.diff.trim().is_empty() {
            failures.push("patch diff is empty".to_string());
        }

        checks_run.push("diff_format".to_string());
        if !(proposal.diff.contains("--- ") && proposal.diff.contains("+++ ")) {
            failures.push("patch is not a unified diff".to_string());
        }

        checks_run.push("targets_declared".to_string());
        if proposal.target_files.is_empty() {
            failures.push("patch declares no target files".to_string());
        }

        // A patch that touches none of the implicated files is suspicious
        // even when well-formed.
        if let Some(analysis) = ctx.analysis.as_ref() {
            if !analysis.suspect_files.is_empty() {
                checks_run.push("targets_implicated_file".to_string());
                let hits_suspect = proposal
                    .target_files
                    .iter()
                    .any(|t| analysis.suspect_files.contains(t));
                if !hits_suspect {
                    failures.push("patch does not touch any implicated file".to_string());
                }
            }
        }

        VerificationReport {
            passed: failures.is_empty(),
            checks_run,
            failure_detail: (!failures.is_empty()).then(|| failures.join("; ")),
        }
    }
}

#[async_trait]
impl Stage for VerifierAgent {
    fn kind(&self) -> StageKind {
        StageKind::Verify
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageFailure> {
        let Some(proposal) = ctx.proposal.as_ref() else {
            return Err(StageFailure::permanent(
                "verifier invoked without a patch proposal",
            ));
        };

        let report = Self::run_checks(ctx, proposal);
        tracing::info!(
            incident_id = %ctx.incident_id,
            passed = report.passed,
            checks = report.checks_run.len(),
            "verification finished"
        );
        Ok(StageOutput::Verified(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle::{AnalysisReport, RepositoryInfo};
    use uuid::Uuid;

    fn ctx_with(proposal: Option<PatchProposal>) -> StageContext {
        let mut ctx = StageContext::new(
            Uuid::new_v4(),
            RepositoryInfo::new("https://github.com/acme/payments"),
            None,
        );
        ctx.analysis = Some(AnalysisReport {
            primary_error: "AttributeError: boom".into(),
            error_lines: vec![],
            exception_types: vec!["AttributeError".into()],
            suspect_files: vec!["src/checkout.py".into()],
        });
        ctx.proposal = proposal;
        ctx
    }

    fn good_proposal() -> PatchProposal {
        PatchProposal {
            summary: "Handle AttributeError".into(),
            diff: "--- a/src/checkout.py\n+++ b/src/checkout.py\n@@\n+    pass\n".into(),
            target_files: vec!["src/checkout.py".into()],
            confidence: 0.8,
        }
    }

    fn report(output: StageOutput) -> VerificationReport {
        match output {
            StageOutput::Verified(r) => r,
            other => panic!("expected verification report, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn well_formed_patch_passes() {
        let output = VerifierAgent::new()
            .execute(&ctx_with(Some(good_proposal())))
            .await
            .unwrap();
        let report = report(output);
        assert!(report.passed);
        assert!(report.checks_run.contains(&"targets_implicated_file".to_string()));
        assert!(report.failure_detail.is_none());
    }

    #[tokio::test]
    async fn empty_diff_fails_with_detail() {
        let mut proposal = good_proposal();
        proposal.diff = "  \n".into();
        let output = VerifierAgent::new()
            .execute(&ctx_with(Some(proposal)))
            .await
            .unwrap();
        let report = report(output);
        assert!(!report.passed);
        let detail = report.failure_detail.unwrap();
        assert!(detail.contains("empty"));
        assert!(detail.contains("unified diff"));
    }

    #[tokio::test]
    async fn patch_missing_the_implicated_files_fails() {
        let mut proposal = good_proposal();
        proposal.target_files = vec!["src/other.py".into()];
        proposal.diff = "--- a/src/other.py\n+++ b/src/other.py\n@@\n+    pass\n".into();
        let output = VerifierAgent::new()
            .execute(&ctx_with(Some(proposal)))
            .await
            .unwrap();
        let report = report(output);
        assert!(!report.passed);
        assert!(report.failure_detail.unwrap().contains("implicated"));
    }

    #[tokio::test]
    async fn missing_proposal_is_a_permanent_failure() {
        let failure = VerifierAgent::new()
            .execute(&ctx_with(None))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, lifecycle::FailureKind::Permanent);
    }
}
