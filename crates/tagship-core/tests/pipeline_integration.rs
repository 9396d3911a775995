//! End-to-end pipeline runs against recording stub stages.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagship_core::{
    ArtifactKind, ArtifactSet, BuildArtifact, BuildError, ExecutionEnvironment, PackageBuilder,
    PipelineError, PipelineStages, PipelineState, ProvisioningError, ProvisioningErrorKind,
    Provisioner, PublishError, PublishErrorKind, ReleasePipeline, ReleasePublisher,
    ReleaseRecord, ReleaseRequest, RunContext, Stage, StageTimeouts, SuffixPrerelease, TestGate,
    TestFailureReason, TestResult, TriggerEvent, TriggerMatcher,
};
use tagship_env::{fingerprint, DependencyManifest, HashSource};
use tagship_state::fakes::MemoryRunLedger;
use tagship_state::{RunLedger, RunStatus};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type CallLog = Arc<Mutex<Vec<&'static str>>>;

fn calls(log: &CallLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

fn environment() -> ExecutionEnvironment {
    let manifest = DependencyManifest::parse(
        r#"
        [tool.poetry]
        name = "termux-monitor"
        version = "2.0.0"

        [tool.poetry.dependencies]
        python = "^3.9"
        requests = "^2.31"
        "#,
    )
    .unwrap();
    let mut installed = BTreeMap::new();
    installed.insert("requests".to_string(), "2.31.0".to_string());
    ExecutionEnvironment {
        requested_runtime: "3.11".to_string(),
        runtime_version: "3.11.4".to_string(),
        manifest,
        installed,
        fingerprint: fingerprint("3.11.4", b"lock", HashSource::Lockfile),
        env_vars: BTreeMap::new(),
    }
}

fn artifacts() -> ArtifactSet {
    ArtifactSet::new(vec![
        BuildArtifact::new(
            "termux_monitor-2.0.0.tar.gz",
            ArtifactKind::SourceArchive,
            b"sdist".to_vec(),
        ),
        BuildArtifact::new(
            "termux_monitor-2.0.0-py3-none-any.whl",
            ArtifactKind::BinaryDistribution,
            b"wheel".to_vec(),
        ),
    ])
}

struct StubProvisioner {
    log: CallLog,
    fail: Option<ProvisioningError>,
    delay: Option<Duration>,
}

#[async_trait]
impl Provisioner for StubProvisioner {
    async fn provision(&self, _ctx: &RunContext) -> Result<ExecutionEnvironment, ProvisioningError> {
        self.log.lock().unwrap().push("provision");
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail {
            Some(err) => Err(err.clone()),
            None => Ok(environment()),
        }
    }
}

struct StubTestGate {
    log: CallLog,
    result: TestResult,
}

#[async_trait]
impl TestGate for StubTestGate {
    async fn run_tests(&self, _ctx: &RunContext, env: &ExecutionEnvironment) -> TestResult {
        assert_eq!(env.runtime_version, "3.11.4");
        self.log.lock().unwrap().push("test");
        self.result.clone()
    }
}

struct StubBuilder {
    log: CallLog,
    fail: Option<BuildError>,
}

#[async_trait]
impl PackageBuilder for StubBuilder {
    async fn build(
        &self,
        _ctx: &RunContext,
        _env: &ExecutionEnvironment,
    ) -> Result<ArtifactSet, BuildError> {
        self.log.lock().unwrap().push("build");
        match &self.fail {
            Some(err) => Err(err.clone()),
            None => Ok(artifacts()),
        }
    }
}

struct StubPublisher {
    log: CallLog,
    fail: Option<PublishError>,
    started: Option<Arc<Notify>>,
    hang: bool,
}

#[async_trait]
impl ReleasePublisher for StubPublisher {
    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseRecord, PublishError> {
        self.log.lock().unwrap().push("publish");
        if let Some(started) = &self.started {
            started.notify_one();
        }
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        Ok(ReleaseRecord {
            id: format!("rel-{}", request.tag_name),
            tag_name: request.tag_name.clone(),
            draft: request.flags.draft,
            prerelease: request.flags.prerelease,
            assets: request.artifacts.iter().map(|a| a.filename.clone()).collect(),
            url: None,
            created_at: chrono::Utc::now(),
        })
    }
}

/// Stub configuration; every stage succeeds unless told otherwise.
struct Harness {
    log: CallLog,
    provision_fail: Option<ProvisioningError>,
    provision_delay: Option<Duration>,
    test_result: TestResult,
    build_fail: Option<BuildError>,
    publish_fail: Option<PublishError>,
    publish_started: Option<Arc<Notify>>,
    publish_hang: bool,
}

impl Harness {
    fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            provision_fail: None,
            provision_delay: None,
            test_result: TestResult::passed(Some(12)),
            build_fail: None,
            publish_fail: None,
            publish_started: None,
            publish_hang: false,
        }
    }

    fn stages(&self) -> PipelineStages {
        PipelineStages {
            provisioner: Arc::new(StubProvisioner {
                log: self.log.clone(),
                fail: self.provision_fail.clone(),
                delay: self.provision_delay,
            }),
            test_gate: Arc::new(StubTestGate {
                log: self.log.clone(),
                result: self.test_result.clone(),
            }),
            builder: Arc::new(StubBuilder {
                log: self.log.clone(),
                fail: self.build_fail.clone(),
            }),
            publisher: Arc::new(StubPublisher {
                log: self.log.clone(),
                fail: self.publish_fail.clone(),
                started: self.publish_started.clone(),
                hang: self.publish_hang,
            }),
        }
    }

    fn pipeline(&self, ledger: Arc<MemoryRunLedger>) -> ReleasePipeline {
        ReleasePipeline::new(self.stages(), ledger).with_config_digest("cfg-digest")
    }
}

fn ctx() -> RunContext {
    RunContext::new("/work/termux-monitor")
}

async fn event_kinds(ledger: &MemoryRunLedger, outcome: &tagship_core::PipelineOutcome) -> Vec<String> {
    let run_id = outcome.run_id.as_ref().expect("run recorded");
    ledger
        .get_events(run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

#[tokio::test]
async fn tag_push_publishes_release() {
    let harness = Harness::new();
    let ledger = Arc::new(MemoryRunLedger::new());
    let outcome = harness
        .pipeline(ledger.clone())
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(outcome.final_state, PipelineState::Succeeded);
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.error.is_none());

    let release = outcome.release.as_ref().unwrap();
    assert_eq!(release.tag_name, "v2.0.0");
    assert!(!release.draft);
    assert!(!release.prerelease);
    assert_eq!(
        release.assets,
        vec![
            "termux_monitor-2.0.0-py3-none-any.whl".to_string(),
            "termux_monitor-2.0.0.tar.gz".to_string(),
        ]
    );

    assert_eq!(
        outcome.transitions,
        vec![
            PipelineState::Idle,
            PipelineState::Matching,
            PipelineState::Provisioning,
            PipelineState::Testing,
            PipelineState::Building,
            PipelineState::Publishing,
            PipelineState::Succeeded,
        ]
    );
    assert_eq!(calls(&harness.log), vec!["provision", "test", "build", "publish"]);

    let record = ledger.get_run(outcome.run_id.as_ref().unwrap()).await.unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.metadata.ref_name, "v2.0.0");
    assert_eq!(record.metadata.config_digest, "cfg-digest");
    let summary = record.summary.unwrap();
    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.release_id.as_deref(), Some("rel-v2.0.0"));
    assert_eq!(summary.final_state, "succeeded");
}

#[tokio::test]
async fn provisioning_failure_stops_the_run() {
    let mut harness = Harness::new();
    harness.provision_fail = Some(ProvisioningError::resolution_conflict(
        "requests ^9 has no matching version",
    ));
    let ledger = Arc::new(MemoryRunLedger::new());
    let outcome = harness
        .pipeline(ledger.clone())
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(outcome.final_state, PipelineState::Failed);
    assert_eq!(outcome.exit_code(), 1);
    match &outcome.error {
        Some(PipelineError::Provisioning(e)) => {
            assert_eq!(e.kind, ProvisioningErrorKind::ResolutionConflict)
        }
        other => panic!("expected provisioning error, got {other:?}"),
    }
    assert_eq!(calls(&harness.log), vec!["provision"]);
    assert!(outcome.release.is_none());

    let record = ledger.get_run(outcome.run_id.as_ref().unwrap()).await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record
        .summary
        .unwrap()
        .error
        .unwrap()
        .contains("resolution_conflict"));
}

#[tokio::test]
async fn branch_push_is_a_no_op() {
    let harness = Harness::new();
    let ledger = Arc::new(MemoryRunLedger::new());
    let outcome = harness
        .pipeline(ledger.clone())
        .run(TriggerEvent::branch("main"), ctx())
        .await;

    assert_eq!(outcome.final_state, PipelineState::NoOp);
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.is_success());
    assert!(calls(&harness.log).is_empty());
    assert_eq!(
        outcome.transitions,
        vec![PipelineState::Idle, PipelineState::Matching, PipelineState::NoOp]
    );

    let record = ledger.get_run(outcome.run_id.as_ref().unwrap()).await.unwrap();
    assert_eq!(record.status, RunStatus::Skipped);
    let events = ledger.get_events(&record.run_id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].payload["skip_reason"], "ref is not a tag");
}

#[tokio::test]
async fn malformed_tags_are_no_ops() {
    for name in ["1.2.3", "v1.2", "release-v1.2.3"] {
        let harness = Harness::new();
        let outcome = harness
            .pipeline(Arc::new(MemoryRunLedger::new()))
            .run(TriggerEvent::tag(name), ctx())
            .await;
        assert_eq!(outcome.final_state, PipelineState::NoOp, "{name}");
        assert!(calls(&harness.log).is_empty(), "{name}");
    }
}

#[tokio::test]
async fn failing_tests_skip_build_and_publish() {
    let mut harness = Harness::new();
    harness.test_result = TestResult::failed(
        TestFailureReason::FailingTests,
        3,
        Some("FAILED tests/test_battery.py::test_low".to_string()),
    );
    let ledger = Arc::new(MemoryRunLedger::new());
    let outcome = harness
        .pipeline(ledger.clone())
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(outcome.exit_code(), 2);
    match &outcome.error {
        Some(PipelineError::Test(failure)) => {
            assert_eq!(failure.count, 3);
            assert_eq!(failure.reason, TestFailureReason::FailingTests);
        }
        other => panic!("expected test failure, got {other:?}"),
    }
    assert_eq!(calls(&harness.log), vec!["provision", "test"]);

    let kinds = event_kinds(&ledger, &outcome).await;
    assert_eq!(kinds.last().map(String::as_str), Some("stage_failed"));
    assert!(!kinds.iter().any(|k| k == "release_incomplete"));
}

#[tokio::test]
async fn empty_suite_fails_the_gate() {
    let mut harness = Harness::new();
    harness.test_result = TestResult::failed(TestFailureReason::NoTestsCollected, 1, None);
    let outcome = harness
        .pipeline(Arc::new(MemoryRunLedger::new()))
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(calls(&harness.log), vec!["provision", "test"]);
}

#[tokio::test]
async fn build_failure_exits_three() {
    let mut harness = Harness::new();
    harness.build_fail = Some(BuildError::invalid_metadata("missing version"));
    let outcome = harness
        .pipeline(Arc::new(MemoryRunLedger::new()))
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(outcome.error.as_ref().unwrap().kind(), "invalid_metadata");
    assert_eq!(calls(&harness.log), vec!["provision", "test", "build"]);
}

#[tokio::test]
async fn duplicate_release_is_not_incomplete() {
    let mut harness = Harness::new();
    harness.publish_fail = Some(PublishError::duplicate("release for v2.0.0 exists"));
    let ledger = Arc::new(MemoryRunLedger::new());
    let outcome = harness
        .pipeline(ledger.clone())
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(outcome.exit_code(), 4);
    match &outcome.error {
        Some(PipelineError::Publish(e)) => assert_eq!(e.kind, PublishErrorKind::DuplicateRelease),
        other => panic!("expected publish error, got {other:?}"),
    }
    let kinds = event_kinds(&ledger, &outcome).await;
    assert!(!kinds.iter().any(|k| k == "release_incomplete"));
}

#[tokio::test]
async fn partial_upload_is_reported_incomplete() {
    let mut harness = Harness::new();
    harness.publish_fail = Some(
        PublishError::unavailable("connection reset during upload").with_progress(
            Some("77".to_string()),
            vec!["termux_monitor-2.0.0-py3-none-any.whl".to_string()],
        ),
    );
    let ledger = Arc::new(MemoryRunLedger::new());
    let outcome = harness
        .pipeline(ledger.clone())
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(outcome.exit_code(), 4);
    let events = ledger
        .get_events(outcome.run_id.as_ref().unwrap())
        .await
        .unwrap();
    let incomplete = events
        .iter()
        .find(|e| e.kind == "release_incomplete")
        .expect("incomplete release recorded");
    assert_eq!(incomplete.payload["release_id"], "77");
    assert_eq!(incomplete.payload["tag"], "v2.0.0");
}

#[tokio::test]
async fn cancellation_while_publishing_warns_incomplete() {
    let started = Arc::new(Notify::new());
    let mut harness = Harness::new();
    harness.publish_started = Some(started.clone());
    harness.publish_hang = true;

    let ledger = Arc::new(MemoryRunLedger::new());
    let pipeline = harness.pipeline(ledger.clone());
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            started.notified().await;
            token.cancel();
        })
    };

    let outcome = pipeline
        .run_with_cancel(TriggerEvent::tag("v2.0.0"), ctx(), token)
        .await;
    canceller.await.unwrap();

    assert_eq!(outcome.final_state, PipelineState::Failed);
    assert_eq!(
        outcome.error,
        Some(PipelineError::Cancelled {
            stage: Stage::Publishing
        })
    );
    assert_eq!(outcome.exit_code(), 4);

    let record = ledger.get_run(outcome.run_id.as_ref().unwrap()).await.unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    let kinds = event_kinds(&ledger, &outcome).await;
    assert!(kinds.iter().any(|k| k == "release_incomplete"));
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let harness = Harness::new();
    let token = CancellationToken::new();
    token.cancel();

    let outcome = harness
        .pipeline(Arc::new(MemoryRunLedger::new()))
        .run_with_cancel(TriggerEvent::tag("v2.0.0"), ctx(), token)
        .await;

    assert_eq!(
        outcome.error,
        Some(PipelineError::Cancelled {
            stage: Stage::Provisioning
        })
    );
    assert_eq!(outcome.exit_code(), 1);
    assert!(calls(&harness.log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_stage_times_out() {
    let mut harness = Harness::new();
    harness.provision_delay = Some(Duration::from_secs(120));
    let outcome = harness
        .pipeline(Arc::new(MemoryRunLedger::new()))
        .with_timeouts(StageTimeouts::uniform(Duration::from_secs(30)))
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    assert_eq!(
        outcome.error,
        Some(PipelineError::TimedOut {
            stage: Stage::Provisioning,
            timeout_secs: 30
        })
    );
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(calls(&harness.log), vec!["provision"]);
}

#[tokio::test]
async fn prerelease_tags_are_opt_in() {
    let harness = Harness::new();
    let pipeline = harness
        .pipeline(Arc::new(MemoryRunLedger::new()))
        .with_matcher(TriggerMatcher::new().allow_prerelease(true))
        .with_classifier(Arc::new(SuffixPrerelease));

    let outcome = pipeline.run(TriggerEvent::tag("v2.1.0-rc.1"), ctx()).await;
    let release = outcome.release.unwrap();
    assert_eq!(release.tag_name, "v2.1.0-rc.1");
    assert!(release.prerelease);

    let outcome = pipeline.run(TriggerEvent::tag("v2.1.0"), ctx()).await;
    assert!(!outcome.release.unwrap().prerelease);
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let harness = Harness::new();
    let ledger = Arc::new(MemoryRunLedger::new());
    let pipeline = Arc::new(harness.pipeline(ledger.clone()));

    let runs = (0..5).map(|i| {
        let pipeline = pipeline.clone();
        async move {
            let tag = format!("v1.0.{i}");
            let ctx = RunContext::new(format!("/work/run-{i}"));
            (tag.clone(), pipeline.run(TriggerEvent::tag(tag), ctx).await)
        }
    });
    let outcomes = futures::future::join_all(runs).await;

    for (tag, outcome) in &outcomes {
        assert_eq!(outcome.final_state, PipelineState::Succeeded);
        assert_eq!(&outcome.release.as_ref().unwrap().tag_name, tag);
    }
    assert_eq!(ledger.len(), 5);
    assert_eq!(ledger.list_runs(Some(2)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn transitions_can_be_driven_one_step_at_a_time() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(Arc::new(MemoryRunLedger::new()));
    let trigger = TriggerEvent::tag("v3.0.0");
    let mut ctx = ctx();

    let mut state = PipelineState::Idle;
    state = pipeline.step(state, &trigger, &mut ctx).await.unwrap();
    assert_eq!(state, PipelineState::Matching);
    state = pipeline.step(state, &trigger, &mut ctx).await.unwrap();
    assert_eq!(state, PipelineState::Provisioning);
    assert_eq!(ctx.tag_version.as_ref().unwrap().major, 3);

    state = pipeline.step(state, &trigger, &mut ctx).await.unwrap();
    assert_eq!(state, PipelineState::Testing);
    assert!(ctx.environment.is_some());
    assert_eq!(calls(&harness.log), vec!["provision"]);

    state = pipeline.step(state, &trigger, &mut ctx).await.unwrap();
    assert_eq!(state, PipelineState::Building);
    state = pipeline.step(state, &trigger, &mut ctx).await.unwrap();
    assert_eq!(state, PipelineState::Publishing);
    assert_eq!(ctx.artifacts.as_ref().unwrap().len(), 2);

    state = pipeline.step(state, &trigger, &mut ctx).await.unwrap();
    assert_eq!(state, PipelineState::Succeeded);
    assert_eq!(ctx.release.as_ref().unwrap().tag_name, "v3.0.0");

    // Terminal states stay put.
    assert_eq!(
        pipeline.step(state, &trigger, &mut ctx).await.unwrap(),
        PipelineState::Succeeded
    );
}

#[tokio::test]
async fn testing_without_environment_is_rejected() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(Arc::new(MemoryRunLedger::new()));
    let mut ctx = ctx();

    let err = pipeline
        .step(PipelineState::Testing, &TriggerEvent::tag("v1.0.0"), &mut ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Precondition {
            stage: Stage::Testing,
            ..
        }
    ));
    assert!(calls(&harness.log).is_empty());
}

#[tokio::test]
async fn ledger_records_stage_events_in_order() {
    let harness = Harness::new();
    let ledger = Arc::new(MemoryRunLedger::new());
    let outcome = harness
        .pipeline(ledger.clone())
        .run(TriggerEvent::tag("v2.0.0"), ctx())
        .await;

    let events = ledger
        .get_events(outcome.run_id.as_ref().unwrap())
        .await
        .unwrap();
    let stages: Vec<(String, String)> = events
        .iter()
        .map(|e| (e.kind.clone(), e.payload["stage"].as_str().unwrap().to_string()))
        .collect();
    let expected: Vec<(String, String)> = [
        "matching",
        "provisioning",
        "testing",
        "building",
        "publishing",
    ]
    .iter()
    .flat_map(|s| {
        [
            ("stage_started".to_string(), s.to_string()),
            ("stage_succeeded".to_string(), s.to_string()),
        ]
    })
    .collect();
    assert_eq!(stages, expected);

    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());

    let record = ledger.get_run(outcome.run_id.as_ref().unwrap()).await.unwrap();
    assert_eq!(record.summary.unwrap().total_events, 10);
}
