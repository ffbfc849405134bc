//! Publisher — final stage. Derives a deterministic branch name from the
//! incident id and produces the pull-request reference the lifecycle
//! records as the terminal artifact. This build constructs a forge
//! "open a PR from branch" URL rather than calling a forge API.

use async_trait::async_trait;

use lifecycle::{
    PullRequestInfo, Stage, StageContext, StageFailure, StageKind, StageOutput,
};

#[derive(Default)]
pub struct PublisherAgent;

impl PublisherAgent {
    pub fn new() -> Self {
        Self
    }

    fn branch_for(ctx: &StageContext) -> String {
        let id = ctx.incident_id.simple().to_string();
        format!("mend/fix-{}", &id[..8])
    }
}

#[async_trait]
impl Stage for PublisherAgent {
    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageFailure> {
        let Some(proposal) = ctx.proposal.as_ref() else {
            return Err(StageFailure::permanent(
                "publisher invoked without a patch proposal",
            ));
        };
        if !ctx.verification.as_ref().is_some_and(|v| v.passed) {
            return Err(StageFailure::permanent(
                "publisher invoked without a passing verification",
            ));
        }

        let base = ctx
            .repository
            .url
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_string();
        let branch = Self::branch_for(ctx);
        let info = PullRequestInfo {
            url: format!("{base}/pull/new/{branch}"),
            branch,
            title: format!("fix: {}", proposal.summary),
        };

        tracing::info!(
            incident_id = %ctx.incident_id,
            url = %info.url,
            branch = %info.branch,
            "pull request prepared"
        );

        Ok(StageOutput::Published(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle::{PatchProposal, RepositoryInfo, VerificationReport};
    use uuid::Uuid;

    fn ctx_ready(url: &str) -> StageContext {
        let mut ctx = StageContext::new(Uuid::new_v4(), RepositoryInfo::new(url), None);
        ctx.proposal = Some(PatchProposal {
            summary: "Handle AttributeError".into(),
            diff: "--- a/x\n+++ b/x\n".into(),
            target_files: vec!["x".into()],
            confidence: 0.8,
        });
        ctx.verification = Some(VerificationReport {
            passed: true,
            checks_run: vec!["diff_format".into()],
            failure_detail: None,
        });
        ctx
    }

    #[tokio::test]
    async fn builds_forge_pr_url_from_incident_id() {
        let ctx = ctx_ready("https://github.com/acme/payments.git");
        let output = PublisherAgent::new().execute(&ctx).await.unwrap();
        let StageOutput::Published(info) = output else {
            panic!("expected pull request info");
        };
        let prefix = &ctx.incident_id.simple().to_string()[..8];
        assert_eq!(info.branch, format!("mend/fix-{prefix}"));
        assert_eq!(
            info.url,
            format!("https://github.com/acme/payments/pull/new/mend/fix-{prefix}")
        );
        assert_eq!(info.title, "fix: Handle AttributeError");
    }

    #[tokio::test]
    async fn refuses_to_publish_without_passing_verification() {
        let mut ctx = ctx_ready("https://github.com/acme/payments");
        ctx.verification = Some(VerificationReport {
            passed: false,
            checks_run: vec![],
            failure_detail: Some("bad patch".into()),
        });
        let failure = PublisherAgent::new().execute(&ctx).await.unwrap_err();
        assert_eq!(failure.kind, lifecycle::FailureKind::Permanent);
    }

    #[tokio::test]
    async fn refuses_to_publish_without_a_proposal() {
        let mut ctx = ctx_ready("https://github.com/acme/payments");
        ctx.proposal = None;
        let failure = PublisherAgent::new().execute(&ctx).await.unwrap_err();
        assert!(failure.reason.contains("proposal"));
    }
}
