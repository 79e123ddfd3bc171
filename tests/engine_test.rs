//! End-to-end engine tests: registration, exclusion, status aggregation,
//! and summary classification across a mixed batch of probes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use palisade::audit::{AuditSettings, StepError, Summary};
use palisade::engine::{
    EngineError, ProbeDescriptor, ProbeGroup, ProbeRegistry, ProbeStatus, ScenarioRunner,
    SuiteOutcome,
};

/// Runner that records one scenario (passing or failing to match its exit
/// status) and returns that status.
struct ScriptedRunner {
    exit: i32,
}

#[async_trait]
impl ScenarioRunner for ScriptedRunner {
    async fn run(
        &self,
        probe: &ProbeDescriptor,
        summary: Arc<Summary>,
    ) -> Result<SuiteOutcome, EngineError> {
        let idx = summary.with_probe(&probe.name, |l| l.start_scenario("scripted", &["@test"]));
        summary.with_probe(&probe.name, |l| {
            l.audit_step(idx, "given_fn", "a given", "d", serde_json::Value::Null, None);
        });
        if self.exit != 0 {
            summary.with_probe(&probe.name, |l| {
                l.audit_step(
                    idx,
                    "when_fn",
                    "a failing step",
                    "d",
                    serde_json::Value::Null,
                    Some(&StepError::new("scripted failure")),
                );
            });
        }
        Ok(SuiteOutcome::with_status(self.exit))
    }
}

/// Runner that fails before any scenario can be recorded.
struct BrokenRunner;

#[async_trait]
impl ScenarioRunner for BrokenRunner {
    async fn run(
        &self,
        _probe: &ProbeDescriptor,
        _summary: Arc<Summary>,
    ) -> Result<SuiteOutcome, EngineError> {
        Err(EngineError::Suite("feature files unreadable".to_owned()))
    }
}

/// Runner that panics mid-suite.
struct PanickingRunner;

#[async_trait]
impl ScenarioRunner for PanickingRunner {
    async fn run(
        &self,
        _probe: &ProbeDescriptor,
        _summary: Arc<Summary>,
    ) -> Result<SuiteOutcome, EngineError> {
        panic!("suite blew up");
    }
}

fn settings(dir: &Path, enabled: bool) -> AuditSettings {
    AuditSettings {
        dir: dir.to_path_buf(),
        enabled,
        overwrite_historical: false,
        summary_enabled: true,
    }
}

fn descriptor(name: &str) -> ProbeDescriptor {
    ProbeDescriptor::new(ProbeGroup::Kubernetes, name)
}

#[tokio::test]
async fn mixed_batch_aggregates_statuses_counters_and_audits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = Arc::new(Summary::new(settings(dir.path(), true)));
    let registry = ProbeRegistry::new(vec!["c".to_owned()]);

    registry.register(descriptor("a"), Arc::new(ScriptedRunner { exit: 0 }), &summary);
    registry.register(descriptor("b"), Arc::new(ScriptedRunner { exit: 1 }), &summary);
    registry.register(descriptor("c"), Arc::new(ScriptedRunner { exit: 0 }), &summary);

    let status = registry.run_all(&summary).await.expect("run completes");
    assert_eq!(status, 1, "overall status is the max probe status");

    assert_eq!(
        registry.get_probe("a").expect("a").status,
        ProbeStatus::CompleteSuccess
    );
    assert_eq!(
        registry.get_probe("b").expect("b").status,
        ProbeStatus::CompleteFail
    );
    assert_eq!(
        registry.get_probe("c").expect("c").status,
        ProbeStatus::Excluded
    );

    summary.set_status();
    let snapshot = summary.snapshot();
    assert_eq!(snapshot.probes_passed, 1);
    assert_eq!(snapshot.probes_failed, 1);
    assert_eq!(snapshot.probes_skipped, 1);
    assert_eq!(snapshot.status, "Complete - 1 of 2 Probes Failed");

    // Audit documents exist for the probes that recorded scenarios, and
    // only for them.
    assert!(dir.path().join("a.json").exists());
    assert!(dir.path().join("b.json").exists());
    assert!(!dir.path().join("c.json").exists());
}

#[tokio::test]
async fn all_probes_passing_yields_the_success_status_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = Arc::new(Summary::new(settings(dir.path(), false)));
    let registry = ProbeRegistry::new(Vec::new());

    registry.register(descriptor("a"), Arc::new(ScriptedRunner { exit: 0 }), &summary);
    registry.register(descriptor("b"), Arc::new(ScriptedRunner { exit: 0 }), &summary);

    let status = registry.run_all(&summary).await.expect("run completes");
    assert_eq!(status, 0);

    summary.set_status();
    assert_eq!(
        summary.snapshot().status,
        "Complete - All Probes Completed Successfully"
    );
}

#[tokio::test]
async fn broken_runner_does_not_abort_the_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = Arc::new(Summary::new(settings(dir.path(), false)));
    let registry = ProbeRegistry::new(Vec::new());

    registry.register(descriptor("broken"), Arc::new(BrokenRunner), &summary);
    registry.register(descriptor("healthy"), Arc::new(ScriptedRunner { exit: 0 }), &summary);

    let status = registry.run_all(&summary).await.expect("run completes");
    assert_eq!(status, 2, "runner errors contribute a distinct status");

    assert_eq!(
        registry.get_probe("broken").expect("broken").status,
        ProbeStatus::Error
    );
    assert_eq!(
        registry.get_probe("healthy").expect("healthy").status,
        ProbeStatus::CompleteSuccess
    );

    // The broken probe recorded no scenarios, so it classifies as skipped.
    let snapshot = summary.snapshot();
    assert_eq!(snapshot.probes_passed, 1);
    assert_eq!(snapshot.probes_skipped, 1);
    assert_eq!(snapshot.probes_failed, 0);
}

#[tokio::test]
async fn panicking_runner_is_contained() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = Arc::new(Summary::new(settings(dir.path(), false)));
    let registry = ProbeRegistry::new(Vec::new());

    registry.register(descriptor("volatile"), Arc::new(PanickingRunner), &summary);
    registry.register(descriptor("healthy"), Arc::new(ScriptedRunner { exit: 0 }), &summary);

    let status = registry.run_all(&summary).await.expect("run completes");
    assert_eq!(status, 2);
    assert_eq!(
        registry.get_probe("volatile").expect("volatile").status,
        ProbeStatus::Error
    );
    assert_eq!(
        registry.get_probe("healthy").expect("healthy").status,
        ProbeStatus::CompleteSuccess
    );
}

#[tokio::test]
async fn historical_audit_conflict_halts_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Seed a historical audit for probe "a" with overwriting disabled.
    std::fs::write(dir.path().join("a.json"), b"{}").expect("seed");

    let summary = Arc::new(Summary::new(settings(dir.path(), true)));
    let registry = ProbeRegistry::new(Vec::new());
    registry.register(descriptor("a"), Arc::new(ScriptedRunner { exit: 0 }), &summary);

    let err = registry
        .run_all(&summary)
        .await
        .expect_err("conflicting audit must halt the run");
    assert!(matches!(err, EngineError::Audit(_)), "got: {err:?}");
}
