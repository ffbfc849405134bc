//! Pipeline orchestration: drive one incident through sanitize → analyze →
//! reason → verify → publish.
//!
//! The orchestrator owns each incident's execution end to end. Stages run
//! strictly sequentially under a per-stage timeout; every invocation and
//! every transition is committed to the timeline through the state
//! machine before the next stage starts. Failures consult the retry
//! policy, which either re-enters the pipeline from the top or finalizes
//! the incident as failed.
//!
//! Concurrency model: incidents execute fully in parallel with no shared
//! mutable state between them; within one incident the
//! [`ExecutionGuard`] admits at most one active execution, and a losing
//! concurrent `start` fails fast without touching the record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{FailureKind, LifecycleError, StageFailure};
use crate::incident::{Incident, NewIncident};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stage::{Stage, StageContext, StageKind, StageOutput};
use crate::state_machine::{Effect, IncidentState, StateMachine};
use crate::store::{ExecutionGuard, IncidentStore};

/// What one attempt's stage loop resolved to.
enum AttemptOutcome {
    /// Terminal success or failure committed; pipeline is done.
    Finished,
    /// Retry policy asked for a restart from the top.
    Restart,
}

pub struct Orchestrator {
    store: Arc<dyn IncidentStore>,
    /// Stages in pipeline order, one per [`StageKind`].
    stages: Vec<Arc<dyn Stage>>,
    config: PipelineConfig,
    policy: RetryPolicy,
    guard: Arc<ExecutionGuard>,
    cancellations: Mutex<HashMap<uuid::Uuid, CancellationToken>>,
}

impl Orchestrator {
    /// Build an orchestrator over `stages`, which must cover every
    /// pipeline position exactly once (in any order; they are sorted by
    /// position here).
    pub fn new(
        store: Arc<dyn IncidentStore>,
        stages: Vec<Arc<dyn Stage>>,
        config: PipelineConfig,
    ) -> Result<Self, LifecycleError> {
        let mut by_kind: HashMap<StageKind, Arc<dyn Stage>> = HashMap::new();
        for stage in stages {
            let kind = stage.kind();
            if by_kind.insert(kind, stage).is_some() {
                return Err(LifecycleError::Misconfigured(format!(
                    "duplicate stage for position {kind}"
                )));
            }
        }
        let mut ordered = Vec::with_capacity(StageKind::SEQUENCE.len());
        for kind in StageKind::SEQUENCE {
            let stage = by_kind.remove(&kind).ok_or_else(|| {
                LifecycleError::Misconfigured(format!("missing stage for position {kind}"))
            })?;
            ordered.push(stage);
        }

        let policy = config.retry_policy();
        Ok(Self {
            store,
            stages: ordered,
            config,
            policy,
            guard: Arc::new(ExecutionGuard::new()),
            cancellations: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<dyn IncidentStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a new incident in `pending` with an empty timeline.
    pub async fn create(&self, new: NewIncident) -> Result<Incident, LifecycleError> {
        let incident = Incident::create(new);
        info!(
            incident_id = %incident.id,
            severity = %incident.severity,
            source = %incident.source,
            "incident created"
        );
        self.store.insert(incident.clone()).await?;
        Ok(incident)
    }

    /// Whether a pipeline execution is currently active for `id`.
    pub fn is_running(&self, id: uuid::Uuid) -> bool {
        self.guard.is_active(id)
    }

    /// Request cooperative cancellation of an active execution. Honored
    /// between stages only. Returns false when nothing is running.
    pub fn cancel(&self, id: uuid::Uuid) -> bool {
        let cancellations = self.cancellations.lock().expect("cancellation registry poisoned");
        match cancellations.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run the pipeline for an incident in `pending` or `retrying`,
    /// returning the final record. Fails fast with
    /// [`LifecycleError::ExecutionActive`] if an execution already holds
    /// the incident's permit.
    pub async fn start(&self, id: uuid::Uuid) -> Result<Incident, LifecycleError> {
        let _permit = self.guard.acquire(id)?;
        let incident = self.store.get(id).await?;
        if !matches!(
            incident.status,
            IncidentState::Pending | IncidentState::Retrying
        ) {
            return Err(LifecycleError::NotStartable {
                id,
                state: incident.status,
            });
        }

        let token = self.register_cancellation(id);
        let result = self.run_pipeline(id, &token).await;
        self.clear_cancellation(id);
        result
    }

    /// External retry request: valid only from `failed`. Clears
    /// `error_message`, preserves the timeline and `patches_generated`,
    /// and re-enters the pipeline as a fresh run with full transient and
    /// semantic retry budgets.
    pub async fn retry(&self, id: uuid::Uuid) -> Result<Incident, LifecycleError> {
        let _permit = self.guard.acquire(id)?;
        let incident = self.store.get(id).await?;
        if incident.status != IncidentState::Failed {
            return Err(LifecycleError::InvalidRetry {
                id,
                state: incident.status,
            });
        }

        self.commit(id, |incident| {
            StateMachine::advance(
                incident,
                IncidentState::Retrying,
                Some(json!({"reason": "manual retry requested"})),
                vec![Effect::ClearError, Effect::ResetSemanticRetries],
            )
            .map_err(Into::into)
        })
        .await?;
        info!(incident_id = %id, "manual retry accepted");

        let token = self.register_cancellation(id);
        let result = self.run_pipeline(id, &token).await;
        self.clear_cancellation(id);
        result
    }

    async fn run_pipeline(
        &self,
        id: uuid::Uuid,
        token: &CancellationToken,
    ) -> Result<Incident, LifecycleError> {
        // The attempt budget is counted per run, not over the lifetime of
        // the incident: a manually retried run starts spending from the
        // record's current attempt number.
        let base_attempt = self.store.get(id).await?.attempt;
        loop {
            match self.run_attempt(id, token, base_attempt).await? {
                AttemptOutcome::Finished => return self.store.get(id).await,
                AttemptOutcome::Restart => continue,
            }
        }
    }

    /// One pass through the stage sequence, from `processing` to either a
    /// terminal state or a `retrying` handoff back to the caller.
    async fn run_attempt(
        &self,
        id: uuid::Uuid,
        token: &CancellationToken,
        base_attempt: u32,
    ) -> Result<AttemptOutcome, LifecycleError> {
        let incident = self.store.get(id).await?;
        let attempt = incident.attempt + 1;
        self.commit(id, |incident| {
            StateMachine::advance(
                incident,
                IncidentState::Processing,
                Some(json!({"attempt": attempt})),
                vec![Effect::BeginAttempt(attempt)],
            )
            .map_err(Into::into)
        })
        .await?;
        info!(incident_id = %id, attempt, "pipeline attempt starting");

        let mut ctx = StageContext::new(id, incident.metadata.repository.clone(), incident.logs);
        ctx.attempt = attempt;

        // Effects earned by the previous stage, applied atomically with
        // the transition out of its state.
        let mut pending_effects: Vec<Effect> = Vec::new();

        for stage in &self.stages {
            let kind = stage.kind();

            if token.is_cancelled() {
                return self
                    .finalize_cancelled(id, kind, std::mem::take(&mut pending_effects))
                    .await;
            }

            self.commit(id, |incident| {
                StateMachine::advance(
                    incident,
                    kind.state(),
                    Some(json!({"stage": kind.as_str(), "attempt": attempt})),
                    std::mem::take(&mut pending_effects),
                )
                .map_err(Into::into)
            })
            .await?;

            let executed =
                match tokio::time::timeout(self.config.stage_timeout, stage.execute(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(StageFailure::transient(format!(
                        "{kind} stage timed out after {}s",
                        self.config.stage_timeout.as_secs()
                    ))),
                };

            let (gated, effects) = match executed {
                Ok(output) => self.gate(output),
                Err(failure) => (Err(failure), Vec::new()),
            };

            match gated {
                Ok(output) => {
                    info!(incident_id = %id, stage = %kind, attempt, "stage succeeded");
                    ctx.absorb(&output);
                    pending_effects = effects;

                    if kind == StageKind::Verify && self.config.dry_run {
                        self.commit(id, |incident| {
                            StateMachine::advance(
                                incident,
                                IncidentState::Completed,
                                Some(json!({"dry_run": true})),
                                std::mem::take(&mut pending_effects),
                            )
                            .map_err(Into::into)
                        })
                        .await?;
                        info!(incident_id = %id, "pipeline completed (dry run, no PR step)");
                        return Ok(AttemptOutcome::Finished);
                    }

                    if kind == StageKind::Publish {
                        let url = match &output {
                            StageOutput::Published(pr) => pr.url.clone(),
                            // The publish stage contract returns Published;
                            // anything else is an adapter defect.
                            _ => {
                                return Err(LifecycleError::Misconfigured(
                                    "publish stage returned a non-publish output".into(),
                                ))
                            }
                        };
                        self.commit(id, |incident| {
                            StateMachine::advance(
                                incident,
                                IncidentState::PrCreated,
                                Some(json!({"stage": "publish", "pr_url": url})),
                                vec![Effect::PullRequest(url.clone())],
                            )
                            .map_err(Into::into)
                        })
                        .await?;
                        info!(incident_id = %id, "pull request created, pipeline finished");
                        return Ok(AttemptOutcome::Finished);
                    }
                }
                Err(failure) => {
                    warn!(
                        incident_id = %id,
                        stage = %kind,
                        attempt,
                        kind = %failure.kind,
                        reason = %failure.reason,
                        "stage failed"
                    );
                    return self
                        .handle_failure(id, kind, failure, effects, attempt - base_attempt)
                        .await;
                }
            }
        }

        // The loop always exits through the publish stage (or the dry-run
        // branch); reaching here means the stage table is inconsistent.
        Err(LifecycleError::Misconfigured(
            "stage sequence ended without a terminal transition".into(),
        ))
    }

    /// Correctness gates: a technically successful stage result can still
    /// fail the pipeline.
    fn gate(&self, output: StageOutput) -> (Result<StageOutput, StageFailure>, Vec<Effect>) {
        match output {
            StageOutput::Sanitized(report) if report.halted => {
                let reason = report
                    .halt_reason
                    .clone()
                    .unwrap_or_else(|| "input judged unsafe to process".into());
                let detail = serde_json::to_value(&report).unwrap_or_default();
                (
                    Err(StageFailure::semantic(format!("sanitizer policy halt: {reason}"))
                        .with_detail(detail)),
                    Vec::new(),
                )
            }
            StageOutput::Proposed(proposal) => {
                // The artifact counts even when the gate rejects it.
                let effects = vec![Effect::PatchGenerated];
                if proposal.confidence < self.config.confidence_threshold {
                    let detail = serde_json::to_value(&proposal).unwrap_or_default();
                    (
                        Err(StageFailure::semantic(format!(
                            "patch confidence {:.2} below threshold {:.2}",
                            proposal.confidence, self.config.confidence_threshold
                        ))
                        .with_detail(detail)),
                        effects,
                    )
                } else {
                    (Ok(StageOutput::Proposed(proposal)), effects)
                }
            }
            StageOutput::Verified(report) if !report.passed => {
                let reason = report
                    .failure_detail
                    .clone()
                    .unwrap_or_else(|| "verification checks did not pass".into());
                let detail = serde_json::to_value(&report).unwrap_or_default();
                (
                    Err(StageFailure::semantic(format!("verification failed: {reason}"))
                        .with_detail(detail)),
                    vec![Effect::Verified(false)],
                )
            }
            StageOutput::Verified(report) => {
                (Ok(StageOutput::Verified(report)), vec![Effect::Verified(true)])
            }
            other => (Ok(other), Vec::new()),
        }
    }

    /// Consult the retry policy and commit the failure transition, the
    /// distinct retry-decision event, and any earned effects.
    async fn handle_failure(
        &self,
        id: uuid::Uuid,
        kind: StageKind,
        failure: StageFailure,
        mut effects: Vec<Effect>,
        attempt_in_run: u32,
    ) -> Result<AttemptOutcome, LifecycleError> {
        let incident = self.store.get(id).await?;
        let decision = self.policy.decide(
            kind.state(),
            &failure,
            attempt_in_run,
            incident.semantic_retries,
        );
        let decision_details = serde_json::to_value(&decision).unwrap_or_default();
        let failure_details = json!({"stage": kind.as_str(), "failure": &failure});

        match decision {
            RetryDecision::Restart { next_attempt, .. } => {
                if failure.kind == FailureKind::Semantic {
                    effects.push(Effect::SemanticRetryUsed);
                }
                self.commit(id, |incident| {
                    StateMachine::advance(
                        incident,
                        IncidentState::Retrying,
                        Some(failure_details),
                        effects,
                    )?;
                    StateMachine::record(incident, decision_details);
                    Ok(())
                })
                .await?;
                info!(incident_id = %id, next_attempt, "retrying after recoverable failure");
                Ok(AttemptOutcome::Restart)
            }
            RetryDecision::GiveUp { reason } => {
                effects.push(Effect::ErrorMessage(reason.clone()));
                self.commit(id, |incident| {
                    StateMachine::advance(
                        incident,
                        IncidentState::Failed,
                        Some(failure_details),
                        effects,
                    )?;
                    StateMachine::record(incident, decision_details);
                    Ok(())
                })
                .await?;
                warn!(incident_id = %id, %reason, "pipeline permanently failed");
                Ok(AttemptOutcome::Finished)
            }
        }
    }

    async fn finalize_cancelled(
        &self,
        id: uuid::Uuid,
        before_stage: StageKind,
        mut effects: Vec<Effect>,
    ) -> Result<AttemptOutcome, LifecycleError> {
        let message = format!("cancelled before {before_stage} stage");
        effects.push(Effect::ErrorMessage(message.clone()));
        self.commit(id, |incident| {
            StateMachine::advance(
                incident,
                IncidentState::Failed,
                Some(json!({"cancelled": true, "before_stage": before_stage.as_str()})),
                effects,
            )
            .map_err(Into::into)
        })
        .await?;
        info!(incident_id = %id, %message, "execution cancelled between stages");
        Ok(AttemptOutcome::Finished)
    }

    /// Read-modify-write one incident. The whole-record `put` is the
    /// atomicity boundary readers observe.
    async fn commit<F>(&self, id: uuid::Uuid, mutate: F) -> Result<Incident, LifecycleError>
    where
        F: FnOnce(&mut Incident) -> Result<(), LifecycleError>,
    {
        let mut incident = self.store.get(id).await?;
        mutate(&mut incident)?;
        self.store.put(incident.clone()).await?;
        Ok(incident)
    }

    fn register_cancellation(&self, id: uuid::Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .expect("cancellation registry poisoned")
            .insert(id, token.clone());
        token
    }

    fn clear_cancellation(&self, id: uuid::Uuid) {
        self.cancellations
            .lock()
            .expect("cancellation registry poisoned")
            .remove(&id);
    }
}
