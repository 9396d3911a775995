//! Release pipeline orchestration and run recording.

use crate::config::TimeoutConfig;
use crate::context::RunContext;
use crate::domain::{
    ArtifactSet, ExecutionEnvironment, MatchDecision, PipelineState, ReleaseRecord,
    ReleaseRequest, TestResult, TriggerEvent,
};
use crate::error::{PipelineError, Result, Stage};
use crate::obs;
use crate::stages::{
    AlwaysStable, PackageBuilder, Provisioner, ReleaseClassifier, ReleasePublisher, TestGate,
    TriggerMatcher,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tagship_state::{RunEvent, RunId, RunLedger, RunMetadata, RunStatus, RunSummary};
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

/// The four external collaborators a run calls, in order.
#[derive(Clone)]
pub struct PipelineStages {
    pub provisioner: Arc<dyn Provisioner>,
    pub test_gate: Arc<dyn TestGate>,
    pub builder: Arc<dyn PackageBuilder>,
    pub publisher: Arc<dyn ReleasePublisher>,
}

/// Upper bound on each stage's wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub provisioning: Duration,
    pub testing: Duration,
    pub building: Duration,
    pub publishing: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

impl StageTimeouts {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            provisioning: Duration::from_secs(config.provisioning_secs),
            testing: Duration::from_secs(config.testing_secs),
            building: Duration::from_secs(config.building_secs),
            publishing: Duration::from_secs(config.publishing_secs),
        }
    }

    /// Same limit for every stage.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            provisioning: limit,
            testing: limit,
            building: limit,
            publishing: limit,
        }
    }

    /// Matching is pure and has no limit.
    pub fn for_stage(&self, stage: Stage) -> Option<Duration> {
        match stage {
            Stage::Matching => None,
            Stage::Provisioning => Some(self.provisioning),
            Stage::Testing => Some(self.testing),
            Stage::Building => Some(self.building),
            Stage::Publishing => Some(self.publishing),
        }
    }
}

/// Result of one complete run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// `None` when the ledger could not record the run
    pub run_id: Option<RunId>,
    pub final_state: PipelineState,
    pub release: Option<ReleaseRecord>,
    pub error: Option<PipelineError>,
    /// Every state the run passed through, starting at `Idle`
    pub transitions: Vec<PipelineState>,
    pub duration_ms: u64,
}

impl PipelineOutcome {
    /// Process exit code: 0 for success and no-op, otherwise the failed stage's code.
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map(PipelineError::exit_code).unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.final_state,
            PipelineState::Succeeded | PipelineState::NoOp
        )
    }
}

/// What a completed stage hands to the next one.
enum StageOutput {
    Environment(ExecutionEnvironment),
    Tests(TestResult),
    Artifacts(ArtifactSet),
    Release(ReleaseRecord),
}

/// Drives a trigger event through matching, provisioning, testing,
/// building and publishing. Strictly sequential, fail-fast, no retries.
///
/// One pipeline may serve concurrent runs; each run owns its
/// [`RunContext`].
pub struct ReleasePipeline {
    matcher: TriggerMatcher,
    classifier: Arc<dyn ReleaseClassifier>,
    stages: PipelineStages,
    timeouts: StageTimeouts,
    ledger: Arc<dyn RunLedger>,
    config_digest: String,
}

impl ReleasePipeline {
    pub fn new(stages: PipelineStages, ledger: Arc<dyn RunLedger>) -> Self {
        Self {
            matcher: TriggerMatcher::new(),
            classifier: Arc::new(AlwaysStable),
            stages,
            timeouts: StageTimeouts::default(),
            ledger,
            config_digest: String::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: TriggerMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ReleaseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Digest of the configuration the run was started with, for the ledger.
    pub fn with_config_digest(mut self, digest: impl Into<String>) -> Self {
        self.config_digest = digest.into();
        self
    }

    /// Run with an externally owned cancellation token.
    pub async fn run_with_cancel(
        &self,
        trigger: TriggerEvent,
        ctx: RunContext,
        token: CancellationToken,
    ) -> PipelineOutcome {
        self.run(trigger, ctx.with_cancel(token)).await
    }

    /// Execute a full run and record it in the ledger.
    ///
    /// Never returns an error: failures end the run in `Failed` and are
    /// reported through [`PipelineOutcome::error`].
    pub async fn run(&self, trigger: TriggerEvent, ctx: RunContext) -> PipelineOutcome {
        let metadata = RunMetadata {
            ref_name: trigger.ref_name.clone(),
            ref_kind: trigger.ref_kind.to_string(),
            config_digest: self.config_digest.clone(),
            tags: json!({ "workdir": ctx.workdir().to_string_lossy() }),
        };
        let recorder = Recorder::start(self.ledger.clone(), metadata).await;
        let span_id = recorder
            .run_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unrecorded".to_string());
        let span = obs::run_span(&span_id, &trigger.ref_name);

        self.drive(trigger, ctx, recorder).instrument(span).await
    }

    async fn drive(
        &self,
        trigger: TriggerEvent,
        mut ctx: RunContext,
        mut recorder: Recorder,
    ) -> PipelineOutcome {
        let start = Instant::now();
        obs::emit_run_started(
            recorder.label(),
            &trigger.ref_name,
            trigger.ref_kind.as_str(),
        );

        let mut state = PipelineState::Idle;
        let mut transitions = vec![state];
        let mut error: Option<PipelineError> = None;

        while !state.is_terminal() {
            let stage = state.stage();
            if let Some(stage) = stage {
                obs::emit_stage_started(stage);
                recorder
                    .record("stage_started", json!({ "stage": stage.name() }))
                    .await;
            }
            let stage_start = Instant::now();

            let next = match self.step(state, &trigger, &mut ctx).await {
                Ok(next) => {
                    if let Some(stage) = stage {
                        let elapsed = stage_start.elapsed().as_millis() as u64;
                        let outcome = if next == PipelineState::NoOp { "no_op" } else { "ok" };
                        obs::emit_stage_finished(stage, elapsed, outcome);
                        let mut payload = json!({
                            "stage": stage.name(),
                            "duration_ms": elapsed,
                            "next": next.as_str(),
                        });
                        if let Some(reason) = ctx.skip_reason {
                            payload["skip_reason"] = json!(reason.to_string());
                        }
                        recorder.record("stage_succeeded", payload).await;
                    }
                    next
                }
                Err(err) => {
                    let stage = err.stage();
                    let elapsed = stage_start.elapsed().as_millis() as u64;
                    let kind = err.kind();
                    obs::emit_stage_finished(stage, elapsed, &kind);
                    recorder
                        .record(
                            "stage_failed",
                            json!({
                                "stage": stage.name(),
                                "kind": kind,
                                "error": err.to_string(),
                                "exit_code": err.exit_code(),
                                "duration_ms": elapsed,
                            }),
                        )
                        .await;
                    self.report_incomplete_release(&trigger, &err, &mut recorder)
                        .await;
                    error = Some(err);
                    PipelineState::Failed
                }
            };
            debug_assert!(state.can_transition_to(next));
            state = next;
            transitions.push(state);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = PipelineOutcome {
            run_id: recorder.run_id.clone(),
            final_state: state,
            release: ctx.release.clone(),
            error,
            transitions,
            duration_ms,
        };

        let status = match (&outcome.final_state, &outcome.error) {
            (PipelineState::Succeeded, _) => RunStatus::Succeeded,
            (PipelineState::NoOp, _) => RunStatus::Skipped,
            (_, Some(PipelineError::Cancelled { .. })) => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        };
        let summary = RunSummary {
            final_state: outcome.final_state.as_str().to_string(),
            exit_code: outcome.exit_code(),
            total_events: recorder.events(),
            duration_ms,
            error: outcome.error.as_ref().map(|e| e.to_string()),
            release_id: outcome.release.as_ref().map(|r| r.id.clone()),
        };
        recorder.finish(status, summary).await;

        obs::emit_run_finished(
            recorder.label(),
            outcome.final_state.as_str(),
            outcome.exit_code(),
            duration_ms,
        );
        outcome
    }

    /// Execute the work of `state` and return the state that follows.
    ///
    /// Cancellation and the stage timeout apply here, so tests can drive
    /// single transitions with stubbed collaborators.
    pub async fn step(
        &self,
        state: PipelineState,
        trigger: &TriggerEvent,
        ctx: &mut RunContext,
    ) -> Result<PipelineState> {
        let Some(stage) = state.stage() else {
            return Ok(state.next());
        };

        if stage == Stage::Matching {
            return Ok(match self.matcher.evaluate(trigger) {
                MatchDecision::Proceed(version) => {
                    info!(version = %version, "release tag matched");
                    ctx.tag_version = Some(version);
                    state.next()
                }
                MatchDecision::Skip(reason) => {
                    info!(trigger = %trigger, reason = %reason, "trigger does not match; nothing to do");
                    ctx.skip_reason = Some(reason);
                    PipelineState::NoOp
                }
            });
        }

        let token = ctx.cancel_token().clone();
        let limit = self.timeouts.for_stage(stage).unwrap_or(Duration::MAX);
        let output = {
            let work = tokio::time::timeout(limit, self.execute(stage, trigger, ctx));
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(PipelineError::Cancelled { stage });
                }
                res = work => match res {
                    Ok(output) => output?,
                    Err(_) => {
                        return Err(PipelineError::TimedOut {
                            stage,
                            timeout_secs: limit.as_secs(),
                        });
                    }
                },
            }
        };

        match output {
            StageOutput::Environment(env) => ctx.environment = Some(env),
            StageOutput::Tests(result) => ctx.test_result = Some(result),
            StageOutput::Artifacts(artifacts) => ctx.artifacts = Some(artifacts),
            StageOutput::Release(record) => ctx.release = Some(record),
        }
        Ok(state.next())
    }

    async fn execute(
        &self,
        stage: Stage,
        trigger: &TriggerEvent,
        ctx: &RunContext,
    ) -> Result<StageOutput> {
        match stage {
            Stage::Matching => Err(PipelineError::Precondition {
                stage,
                message: "matching has no external work".to_string(),
            }),
            Stage::Provisioning => {
                let env = self.stages.provisioner.provision(ctx).await?;
                Ok(StageOutput::Environment(env))
            }
            Stage::Testing => {
                let env = require_environment(stage, ctx)?;
                let result = self.stages.test_gate.run_tests(ctx, env).await;
                match result.clone().into_failure() {
                    Some(failure) => Err(failure.into()),
                    None => Ok(StageOutput::Tests(result)),
                }
            }
            Stage::Building => {
                let env = require_environment(stage, ctx)?;
                let artifacts = self.stages.builder.build(ctx, env).await?;
                Ok(StageOutput::Artifacts(artifacts))
            }
            Stage::Publishing => {
                let artifacts = ctx.artifacts.clone().ok_or_else(|| {
                    PipelineError::Precondition {
                        stage,
                        message: "no build artifacts in context".to_string(),
                    }
                })?;
                let version = ctx.tag_version.as_ref().ok_or_else(|| {
                    PipelineError::Precondition {
                        stage,
                        message: "no matched tag version in context".to_string(),
                    }
                })?;
                let request = ReleaseRequest {
                    tag_name: trigger.ref_name.clone(),
                    flags: self.classifier.classify(version),
                    artifacts,
                };
                let record = self.stages.publisher.publish(&request).await?;
                Ok(StageOutput::Release(record))
            }
        }
    }

    /// A release interrupted while publishing may exist without all its
    /// assets. Nothing is rolled back; the operator is told instead.
    async fn report_incomplete_release(
        &self,
        trigger: &TriggerEvent,
        err: &PipelineError,
        recorder: &mut Recorder,
    ) {
        if err.stage() != Stage::Publishing {
            return;
        }
        let (release_id, uploaded) = match err {
            PipelineError::Publish(e) if e.is_partial() => (e.release_id.clone(), e.uploaded.clone()),
            PipelineError::Cancelled { .. } | PipelineError::TimedOut { .. } => (None, Vec::new()),
            _ => return,
        };
        obs::emit_release_incomplete(
            &trigger.ref_name,
            release_id.as_deref(),
            &uploaded,
            &err.kind(),
        );
        recorder
            .record(
                "release_incomplete",
                json!({
                    "tag": trigger.ref_name,
                    "release_id": release_id,
                    "uploaded": uploaded,
                    "reason": err.kind(),
                }),
            )
            .await;
    }
}

fn require_environment(stage: Stage, ctx: &RunContext) -> Result<&ExecutionEnvironment> {
    ctx.environment
        .as_ref()
        .ok_or_else(|| PipelineError::Precondition {
            stage,
            message: "no provisioned environment in context".to_string(),
        })
}

/// Writes run events to the ledger. Ledger failures are logged and never
/// change the run's outcome.
struct Recorder {
    ledger: Arc<dyn RunLedger>,
    run_id: Option<RunId>,
    seq: u64,
}

impl Recorder {
    async fn start(ledger: Arc<dyn RunLedger>, metadata: RunMetadata) -> Self {
        let run_id = match ledger.create_run(metadata).await {
            Ok(id) => Some(id),
            Err(e) => {
                obs::emit_ledger_error("unrecorded", &e);
                None
            }
        };
        Self {
            ledger,
            run_id,
            seq: 0,
        }
    }

    fn label(&self) -> &str {
        self.run_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unrecorded")
    }

    fn events(&self) -> u64 {
        self.seq
    }

    async fn record(&mut self, kind: &str, payload: serde_json::Value) {
        let Some(run_id) = &self.run_id else {
            return;
        };
        self.seq += 1;
        let event = RunEvent::now(self.seq, kind, payload);
        if let Err(e) = self.ledger.append_event(run_id, event).await {
            obs::emit_ledger_error(&run_id.0, &e);
        }
    }

    async fn finish(&self, status: RunStatus, summary: RunSummary) {
        let Some(run_id) = &self.run_id else {
            return;
        };
        if let Err(e) = self.ledger.finish_run(run_id, status, summary).await {
            obs::emit_ledger_error(&run_id.0, &e);
        }
    }
}
