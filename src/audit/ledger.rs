//! Per-probe ledger: counters, metadata, and the scenario trail.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::trail::{ProbeAuditDocument, ScenarioAudit, ScenarioResult};
use super::{AuditError, AuditSettings, StepError};

/// Mutable counter/record structure tracking one probe's progress.
///
/// Created lazily on first reference by name, mutated by scenario callbacks
/// during a run, finalized exactly once by
/// [`Summary::complete_probe`](super::Summary::complete_probe).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProbeLedger {
    /// Open-ended metadata (group, audit path, operator notes).
    pub meta: BTreeMap<String, serde_json::Value>,
    /// Pods created on behalf of this probe.
    pub pods_created: usize,
    /// Pods destroyed on behalf of this probe.
    pub pods_destroyed: usize,
    /// Scenario tallies, recomputed from the trail at completion.
    pub scenarios_attempted: usize,
    /// Scenarios whose derived result was Passed.
    pub scenarios_succeeded: usize,
    /// Scenarios whose derived result was Failed.
    pub scenarios_failed: usize,
    /// Terminal probe result string, classified at completion.
    pub result: String,

    #[serde(skip)]
    pub(crate) name: String,
    #[serde(skip)]
    pub(crate) scenarios: BTreeMap<usize, ScenarioAudit>,
    #[serde(skip)]
    pub(crate) completed: bool,
    #[serde(skip)]
    pub(crate) audit_path: PathBuf,
}

impl ProbeLedger {
    pub(crate) fn new(name: &str, settings: &AuditSettings) -> Self {
        let audit_path = settings.dir.join(format!("{name}.json"));
        let mut meta = BTreeMap::new();
        // Meta is open for extension; similar run data can be stored there
        // as needed.
        meta.insert(
            "audit_path".to_owned(),
            serde_json::Value::String(audit_path.display().to_string()),
        );
        Self {
            meta,
            pods_created: 0,
            pods_destroyed: 0,
            scenarios_attempted: 0,
            scenarios_succeeded: 0,
            scenarios_failed: 0,
            result: String::new(),
            name: name.to_owned(),
            scenarios: BTreeMap::new(),
            completed: false,
            audit_path,
        }
    }

    /// Increment the created-pods counter.
    pub fn count_pod_created(&mut self) {
        self.pods_created = self.pods_created.saturating_add(1);
    }

    /// Increment the destroyed-pods counter.
    pub fn count_pod_destroyed(&mut self) {
        self.pods_destroyed = self.pods_destroyed.saturating_add(1);
    }

    /// Allocate a new scenario ledger with a fresh step counter and return
    /// its 1-based index.
    pub fn start_scenario(&mut self, name: &str, tags: &[&str]) -> usize {
        let index = self.scenarios.len().saturating_add(1);
        self.scenarios.insert(index, ScenarioAudit::new(name, tags));
        index
    }

    /// Record a step against the scenario at `scenario_index`.
    ///
    /// `err == None` marks the step Passed; otherwise Failed with the error
    /// message persisted (log-level prefixes stripped). The scenario result
    /// is re-derived per the trail rules. An unknown index is logged and
    /// ignored rather than inventing a scenario the caller never started.
    pub fn audit_step(
        &mut self,
        scenario_index: usize,
        function: &str,
        step_name: &str,
        description: &str,
        payload: serde_json::Value,
        err: Option<&StepError>,
    ) {
        match self.scenarios.get_mut(&scenario_index) {
            Some(scenario) => {
                scenario.audit_step(function, step_name, description, payload, err);
            }
            None => {
                tracing::warn!(
                    probe = %self.name,
                    scenario_index,
                    step = step_name,
                    "step recorded against unknown scenario index, dropping"
                );
            }
        }
    }

    /// Derived result of the scenario at `scenario_index`, if it exists.
    pub fn scenario_result(&self, scenario_index: usize) -> Option<ScenarioResult> {
        self.scenarios.get(&scenario_index).map(|s| s.result)
    }

    /// True once at least one scenario has been recorded.
    pub fn scenario_ran(&self) -> bool {
        !self.scenarios.is_empty()
    }

    /// Recompute scenario tallies from the live trail.
    ///
    /// Tallies are always derived fresh rather than drifted incrementally;
    /// "Given Not Met" scenarios count as neither succeeded nor failed.
    pub(crate) fn recount(&mut self) {
        self.scenarios_attempted = self.scenarios.len();
        self.scenarios_succeeded = self
            .scenarios
            .values()
            .filter(|s| s.result == ScenarioResult::Passed)
            .count();
        self.scenarios_failed = self
            .scenarios
            .values()
            .filter(|s| s.result == ScenarioResult::Failed)
            .count();
    }

    pub(crate) fn write_audit(&self, settings: &AuditSettings) -> Result<(), AuditError> {
        ProbeAuditDocument {
            name: &self.name,
            pods_destroyed: self.pods_destroyed,
            scenarios_attempted: self.scenarios_attempted,
            scenarios_succeeded: self.scenarios_succeeded,
            scenarios_failed: self.scenarios_failed,
            result: &self.result,
            scenarios: &self.scenarios,
        }
        .write(&self.audit_path, settings)
    }
}
