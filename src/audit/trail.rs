//! Per-scenario step ledger and the persisted per-probe audit document.
//!
//! Step indices are 1-based, contiguous, and never reused within a scenario.
//! The scenario result is derived deterministically from the step sequence:
//! a failure at step 1 records "Given Not Met" (the opening given was not
//! satisfied), a failure at any later step latches "Failed", and neither is
//! ever cleared back to "Passed" by a later successful step. A later failure
//! does upgrade "Given Not Met" to "Failed".

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{strip_log_prefixes, AuditError, AuditSettings, StepError};

/// Outcome of a single audited step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResult {
    /// The step completed without error.
    Passed,
    /// The step returned or raised an error.
    Failed,
}

/// Derived outcome of a scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioResult {
    /// No step has been recorded yet.
    #[default]
    #[serde(rename = "")]
    Undetermined,
    /// Every recorded step passed.
    Passed,
    /// A step after the first failed.
    Failed,
    /// The first step (the scenario's given) failed.
    #[serde(rename = "Given Not Met")]
    GivenNotMet,
}

/// One atomic assertion or action within a scenario. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StepAudit {
    /// Name of the step function that produced this entry.
    pub function: String,
    /// Human-readable step name.
    pub name: String,
    /// Long-form explanation of what the step did.
    pub description: String,
    /// Pass/fail outcome.
    pub result: StepResult,
    /// Failure message, present iff the step failed. Log-level prefixes are
    /// stripped before persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Arbitrary structured values observed by the step (anything sent
    /// across the network belongs here, not in the description).
    pub payload: serde_json::Value,
}

/// Ordered step ledger for one scenario invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScenarioAudit {
    /// Scenario name.
    pub name: String,
    /// Derived scenario result.
    pub result: ScenarioResult,
    /// Tags attached at scenario start, in declaration order.
    pub tags: Vec<String>,
    /// Steps keyed by their 1-based index.
    pub steps: BTreeMap<usize, StepAudit>,
}

impl ScenarioAudit {
    pub(crate) fn new(name: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            name: name.into(),
            result: ScenarioResult::Undetermined,
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
            steps: BTreeMap::new(),
        }
    }

    /// Append a step at the next index and fold its outcome into the
    /// scenario result.
    pub fn audit_step(
        &mut self,
        function: &str,
        name: &str,
        description: &str,
        payload: serde_json::Value,
        err: Option<&StepError>,
    ) -> usize {
        let index = self.steps.len().saturating_add(1);
        let (result, error) = match err {
            None => (StepResult::Passed, None),
            Some(e) => (StepResult::Failed, Some(strip_log_prefixes(e.message()))),
        };
        self.steps.insert(
            index,
            StepAudit {
                function: function.to_owned(),
                name: name.to_owned(),
                description: description.to_owned(),
                result,
                error,
                payload,
            },
        );

        match result {
            StepResult::Passed => {
                // A success never clears a latched failure.
                if matches!(
                    self.result,
                    ScenarioResult::Undetermined | ScenarioResult::Passed
                ) {
                    self.result = ScenarioResult::Passed;
                }
            }
            StepResult::Failed => {
                // First entry is always a given; a failure there means the
                // scenario's precondition was not met rather than a test
                // failure. Any later failure is a real one.
                self.result = if index == 1 {
                    ScenarioResult::GivenNotMet
                } else {
                    ScenarioResult::Failed
                };
            }
        }
        index
    }
}

/// The serialized per-probe audit document.
///
/// Written to `{audit_dir}/{probe}.json`; one document per probe per run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ProbeAuditDocument<'a> {
    pub name: &'a str,
    pub pods_destroyed: usize,
    pub scenarios_attempted: usize,
    pub scenarios_succeeded: usize,
    pub scenarios_failed: usize,
    pub result: &'a str,
    pub scenarios: &'a BTreeMap<usize, ScenarioAudit>,
}

impl ProbeAuditDocument<'_> {
    /// Persist the document under the audit directory.
    ///
    /// Suppressed entirely when auditing is disabled or no scenario was
    /// recorded (an empty document would imply a run that never happened).
    /// A pre-existing document with overwriting disabled is a fatal
    /// configuration error, never a silent skip.
    pub(crate) fn write(&self, path: &Path, settings: &AuditSettings) -> Result<(), AuditError> {
        if !settings.enabled {
            tracing::debug!(probe = self.name, "audit output disabled, skipping write");
            return Ok(());
        }
        if self.scenarios.is_empty() {
            tracing::debug!(probe = self.name, "no scenarios recorded, audit suppressed");
            return Ok(());
        }

        if path.exists() && !settings.overwrite_historical {
            return Err(AuditError::HistoricalAuditConflict {
                path: path.display().to_string(),
            });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }

        let body = serde_json::to_vec_pretty(self).map_err(|source| AuditError::Serialize {
            probe: self.name.to_owned(),
            source,
        })?;
        std::fs::write(path, body).map_err(|source| AuditError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(probe = self.name, path = %path.display(), "audit document written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(audit: &mut ScenarioAudit) -> usize {
        audit.audit_step("step_fn", "step", "a passing step", serde_json::Value::Null, None)
    }

    fn fail(audit: &mut ScenarioAudit, message: &str) -> usize {
        audit.audit_step(
            "step_fn",
            "step",
            "a failing step",
            serde_json::Value::Null,
            Some(&StepError::new(message)),
        )
    }

    #[test]
    fn step_indices_are_contiguous_from_one() {
        let mut audit = ScenarioAudit::new("indices", &[]);
        assert_eq!(pass(&mut audit), 1);
        assert_eq!(fail(&mut audit, "x"), 2);
        assert_eq!(pass(&mut audit), 3);
        assert_eq!(
            audit.steps.keys().copied().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn all_steps_passing_yields_passed() {
        let mut audit = ScenarioAudit::new("all pass", &[]);
        pass(&mut audit);
        pass(&mut audit);
        pass(&mut audit);
        assert_eq!(audit.result, ScenarioResult::Passed);
    }

    #[test]
    fn first_step_failure_is_given_not_met() {
        let mut audit = ScenarioAudit::new("given fails", &[]);
        fail(&mut audit, "no cluster");
        assert_eq!(audit.result, ScenarioResult::GivenNotMet);
    }

    #[test]
    fn later_success_does_not_clear_given_not_met() {
        let mut audit = ScenarioAudit::new("given fails, rest pass", &[]);
        fail(&mut audit, "no cluster");
        pass(&mut audit);
        pass(&mut audit);
        assert_eq!(audit.result, ScenarioResult::GivenNotMet);
    }

    #[test]
    fn later_failure_upgrades_given_not_met_to_failed() {
        let mut audit = ScenarioAudit::new("given fails then step fails", &[]);
        fail(&mut audit, "no cluster");
        fail(&mut audit, "assertion failed");
        assert_eq!(audit.result, ScenarioResult::Failed);
    }

    #[test]
    fn failure_after_step_one_latches_failed() {
        let mut audit = ScenarioAudit::new("mid failure", &[]);
        pass(&mut audit);
        fail(&mut audit, "denied");
        pass(&mut audit);
        pass(&mut audit);
        assert_eq!(audit.result, ScenarioResult::Failed);
    }

    #[test]
    fn zero_steps_is_undetermined() {
        let audit = ScenarioAudit::new("empty", &[]);
        assert_eq!(audit.result, ScenarioResult::Undetermined);
    }

    #[test]
    fn failed_step_error_is_recorded_with_prefix_stripped() {
        let mut audit = ScenarioAudit::new("prefix", &[]);
        fail(&mut audit, "[ERROR] creation was forbidden");
        let step = audit.steps.get(&1).expect("step 1 recorded");
        assert_eq!(step.result, StepResult::Failed);
        assert_eq!(step.error.as_deref(), Some("creation was forbidden"));
    }

    #[test]
    fn passed_step_has_no_error_field() {
        let mut audit = ScenarioAudit::new("clean", &[]);
        pass(&mut audit);
        let step = audit.steps.get(&1).expect("step 1 recorded");
        assert_eq!(step.error, None);
        let rendered = serde_json::to_string(step).expect("serialize");
        assert!(!rendered.contains("\"Error\""));
    }

    #[test]
    fn scenario_result_serializes_to_display_strings() {
        assert_eq!(
            serde_json::to_string(&ScenarioResult::GivenNotMet).expect("serialize"),
            "\"Given Not Met\""
        );
        assert_eq!(
            serde_json::to_string(&ScenarioResult::Undetermined).expect("serialize"),
            "\"\""
        );
    }

    #[test]
    fn write_respects_enabled_flag_and_empty_trails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("probe.json");
        let scenarios = BTreeMap::new();
        let doc = ProbeAuditDocument {
            name: "probe",
            pods_destroyed: 0,
            scenarios_attempted: 0,
            scenarios_succeeded: 0,
            scenarios_failed: 0,
            result: "Success",
            scenarios: &scenarios,
        };

        let enabled = AuditSettings {
            dir: dir.path().to_path_buf(),
            enabled: true,
            overwrite_historical: false,
            summary_enabled: true,
        };
        // Zero scenarios: suppressed, not written as an empty file.
        doc.write(&path, &enabled).expect("suppressed write is ok");
        assert!(!path.exists());

        let mut one = BTreeMap::new();
        one.insert(1, ScenarioAudit::new("s", &[]));
        let doc = ProbeAuditDocument {
            scenarios: &one,
            ..doc
        };
        let disabled = AuditSettings {
            enabled: false,
            ..enabled.clone()
        };
        doc.write(&path, &disabled).expect("disabled write is ok");
        assert!(!path.exists());

        doc.write(&path, &enabled).expect("write");
        assert!(path.exists());
    }

    #[test]
    fn write_conflict_is_fatal_when_overwrite_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("probe.json");
        std::fs::write(&path, b"{}").expect("seed historical audit");

        let mut one = BTreeMap::new();
        one.insert(1, ScenarioAudit::new("s", &[]));
        let doc = ProbeAuditDocument {
            name: "probe",
            pods_destroyed: 0,
            scenarios_attempted: 1,
            scenarios_succeeded: 1,
            scenarios_failed: 0,
            result: "Success",
            scenarios: &one,
        };

        let settings = AuditSettings {
            dir: dir.path().to_path_buf(),
            enabled: true,
            overwrite_historical: false,
            summary_enabled: true,
        };
        let err = doc.write(&path, &settings).expect_err("conflict is fatal");
        assert!(matches!(err, AuditError::HistoricalAuditConflict { .. }));

        let overwrite = AuditSettings {
            overwrite_historical: true,
            ..settings
        };
        doc.write(&path, &overwrite).expect("overwrite allowed");
    }
}
