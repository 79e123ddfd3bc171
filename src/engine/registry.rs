//! The probe registry and the sequential execution loop.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audit::Summary;

use super::runner::ScenarioRunner;
use super::{EngineError, Probe, ProbeDescriptor, ProbeStatus};

/// Exit status contributed by a probe whose runner errored or panicked,
/// distinct from a clean scenario failure (1).
const EXECUTION_ERROR_STATUS: i32 = 2;

/// Name-keyed collection of runnable probes.
///
/// Reads may be concurrent with each other but are exclusive with
/// registration; probes themselves are owned exclusively by the registry.
/// Iteration order during a run is map order and deliberately unspecified.
pub struct ProbeRegistry {
    probes: RwLock<HashMap<String, Probe>>,
    exclusions: Vec<String>,
}

impl ProbeRegistry {
    /// Create an empty registry with the configured tag exclusions.
    pub fn new(exclusions: Vec<String>) -> Self {
        Self {
            probes: RwLock::new(HashMap::new()),
            exclusions,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Probe>> {
        match self.probes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Probe>> {
        match self.probes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a probe under its descriptor name.
    ///
    /// A probe matching a configured exclusion is registered as Excluded and
    /// will never execute. Registering a second probe under an existing name
    /// silently replaces the prior entry (last writer wins); the replacement
    /// is logged so a duplicate registration is at least visible.
    pub fn register(
        &self,
        descriptor: ProbeDescriptor,
        runner: Arc<dyn ScenarioRunner>,
        summary: &Summary,
    ) {
        let status = if descriptor.is_excluded(&self.exclusions) {
            ProbeStatus::Excluded
        } else {
            ProbeStatus::Pending
        };

        let name = descriptor.name.clone();
        let group = descriptor.group.to_string();
        let probe = Probe {
            descriptor,
            status,
            results: String::new(),
            runner,
        };

        let replaced = self.write().insert(name.clone(), probe).is_some();
        if replaced {
            tracing::warn!(probe = %name, "duplicate registration replaced existing probe");
        }

        // Seed the audit side so even never-executed probes appear in the
        // run summary.
        summary.with_probe(&name, |ledger| {
            ledger.result = status.to_string();
        });
        summary.log_probe_meta(&name, "group", group);
    }

    /// Return the probe registered under `name`.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] when no probe is registered under `name`;
    /// the registry never synthesizes a placeholder.
    pub fn get_probe(&self, name: &str) -> Result<Probe, EngineError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_owned()))
    }

    /// Names of all registered probes, in map order.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Number of registered probes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when no probes are registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn set_status(&self, name: &str, status: ProbeStatus) {
        if let Some(probe) = self.write().get_mut(name) {
            probe.status = status;
        }
    }

    fn set_results(&self, name: &str, output: String) {
        if let Some(probe) = self.write().get_mut(name) {
            probe.results = output;
        }
    }

    /// Execute every registered probe, one at a time.
    ///
    /// Excluded probes are not executed. Each runner is spawned on its own
    /// task so a panicking suite is contained: the probe is marked Error,
    /// logged, and the batch continues. Every probe — run, failed, or
    /// excluded — is completed against the summary exactly once. The
    /// returned status is the maximum of all per-probe statuses.
    ///
    /// # Errors
    ///
    /// Only a fatal audit configuration error halts the batch.
    pub async fn run_all(&self, summary: &Arc<Summary>) -> Result<i32, EngineError> {
        let names = self.names();
        let mut overall = 0;

        for name in names {
            let probe = match self.get_probe(&name) {
                Ok(probe) => probe,
                Err(_) => continue,
            };

            if probe.status != ProbeStatus::Excluded {
                self.set_status(&name, ProbeStatus::Running);
                tracing::info!(probe = %name, "probe starting");

                let runner = Arc::clone(&probe.runner);
                let descriptor = probe.descriptor.clone();
                let task_summary = Arc::clone(summary);
                let outcome = tokio::spawn(async move {
                    runner.run(&descriptor, task_summary).await
                })
                .await;

                match outcome {
                    Ok(Ok(suite)) => {
                        let status = if suite.status == 0 {
                            ProbeStatus::CompleteSuccess
                        } else {
                            ProbeStatus::CompleteFail
                        };
                        tracing::info!(probe = %name, exit = suite.status, "probe complete");
                        overall = overall.max(suite.status);
                        self.set_results(&name, suite.output);
                        self.set_status(&name, status);
                    }
                    Ok(Err(e)) => {
                        // Log but continue with remaining probes.
                        tracing::error!(probe = %name, error = %e, "error executing probe");
                        overall = overall.max(EXECUTION_ERROR_STATUS);
                        self.set_status(&name, ProbeStatus::Error);
                    }
                    Err(join_error) => {
                        tracing::error!(
                            probe = %name,
                            error = %join_error,
                            "probe suite panicked"
                        );
                        overall = overall.max(EXECUTION_ERROR_STATUS);
                        self.set_status(&name, ProbeStatus::Error);
                    }
                }
            } else {
                tracing::info!(probe = %name, "probe excluded, skipping execution");
            }

            summary.complete_probe(&name)?;
        }

        Ok(overall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditSettings, Summary};
    use crate::engine::runner::SuiteOutcome;
    use crate::engine::ProbeGroup;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct FixedRunner(i32);

    #[async_trait]
    impl ScenarioRunner for FixedRunner {
        async fn run(
            &self,
            _probe: &ProbeDescriptor,
            _summary: Arc<Summary>,
        ) -> Result<SuiteOutcome, EngineError> {
            Ok(SuiteOutcome::with_status(self.0))
        }
    }

    fn summary() -> Arc<Summary> {
        Arc::new(Summary::new(AuditSettings {
            dir: PathBuf::from("audit"),
            enabled: false,
            overwrite_historical: false,
            summary_enabled: true,
        }))
    }

    fn descriptor(name: &str) -> ProbeDescriptor {
        ProbeDescriptor::new(ProbeGroup::Kubernetes, name)
    }

    #[test]
    fn get_probe_is_not_found_for_unregistered_name() {
        let registry = ProbeRegistry::new(Vec::new());
        let err = registry.get_probe("ghost").expect_err("must not synthesize");
        assert!(matches!(err, EngineError::NotFound(name) if name == "ghost"));
    }

    #[test]
    fn duplicate_registration_is_last_writer_wins() {
        let registry = ProbeRegistry::new(Vec::new());
        let summary = summary();
        registry.register(descriptor("dup"), Arc::new(FixedRunner(0)), &summary);
        registry.register(descriptor("dup"), Arc::new(FixedRunner(7)), &summary);
        assert_eq!(registry.len(), 1);
        // The surviving entry is the second registration.
        let probe = registry.get_probe("dup").expect("registered");
        assert_eq!(probe.status, ProbeStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_registration_runs_the_survivor() {
        let registry = ProbeRegistry::new(Vec::new());
        let summary = summary();
        registry.register(descriptor("dup"), Arc::new(FixedRunner(0)), &summary);
        registry.register(descriptor("dup"), Arc::new(FixedRunner(3)), &summary);
        let status = registry.run_all(&summary).await.expect("run");
        assert_eq!(status, 3);
    }

    #[test]
    fn exclusion_matches_name_or_group() {
        let registry = ProbeRegistry::new(vec!["kubernetes".to_owned()]);
        let summary = summary();
        registry.register(descriptor("anything"), Arc::new(FixedRunner(0)), &summary);
        let probe = registry.get_probe("anything").expect("registered");
        assert_eq!(probe.status, ProbeStatus::Excluded);
    }

    #[tokio::test]
    async fn excluded_probe_contributes_zero_status() {
        let registry = ProbeRegistry::new(vec!["skipme".to_owned()]);
        let summary = summary();
        registry.register(descriptor("skipme"), Arc::new(FixedRunner(9)), &summary);
        let status = registry.run_all(&summary).await.expect("run");
        assert_eq!(status, 0);
        assert_eq!(
            registry.get_probe("skipme").expect("registered").status,
            ProbeStatus::Excluded
        );
    }
}
