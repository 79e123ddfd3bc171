//! Run-wide summary aggregation.
//!
//! One [`Summary`] value is constructed in `main` and passed by reference to
//! the execution engine and every scenario callback; there is no package
//! level state. All ledger access flows through a single lock so the
//! structure stays correct if probe execution is ever parallelized.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::ledger::ProbeLedger;
use super::{AuditError, AuditSettings};

/// Probe result string for a probe that was excluded before execution.
pub const RESULT_EXCLUDED: &str = "Excluded";
/// Probe result string for a probe that registered no scenarios.
pub const RESULT_NO_SCENARIOS: &str = "No Scenarios Executed";
/// Probe result string for a probe whose scenarios all avoided failure.
pub const RESULT_SUCCESS: &str = "Success";
/// Probe result string for a probe with at least one failed scenario.
pub const RESULT_FAILED: &str = "Failed";

#[derive(Debug, Default)]
struct SummaryInner {
    status: String,
    probes_passed: usize,
    probes_failed: usize,
    probes_skipped: usize,
    probes: BTreeMap<String, ProbeLedger>,
    meta: BTreeMap<String, serde_json::Value>,
}

/// Run-wide counters and status, keyed by probe name.
///
/// Ledgers are created lazily on first reference (get-or-create); counters
/// are written exactly once per probe by [`Summary::complete_probe`], which
/// is transition-guarded against double invocation.
#[derive(Debug)]
pub struct Summary {
    settings: AuditSettings,
    inner: Mutex<SummaryInner>,
}

/// Serializable snapshot of the run summary, read non-destructively at run
/// end.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummarySnapshot {
    /// Human-readable run status string.
    pub status: String,
    /// Probes classified as passed.
    pub probes_passed: usize,
    /// Probes classified as failed.
    pub probes_failed: usize,
    /// Probes classified as skipped (excluded or scenario-free).
    pub probes_skipped: usize,
    /// Per-probe ledgers.
    pub probes: BTreeMap<String, ProbeLedger>,
    /// Run-level metadata (run id, start time, created pod names).
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Summary {
    /// Create an empty summary for a new run.
    pub fn new(settings: AuditSettings) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert(
            "run_id".to_owned(),
            serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
        );
        meta.insert(
            "started_at".to_owned(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        meta.insert("names of pods created".to_owned(), serde_json::json!([]));
        Self {
            settings,
            inner: Mutex::new(SummaryInner {
                status: "Running".to_owned(),
                meta,
                ..SummaryInner::default()
            }),
        }
    }

    /// The audit settings this summary writes under.
    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, SummaryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` against the named probe's ledger, creating it first if this
    /// is the first reference. Safe to call before, during, and after the
    /// probe's run.
    pub fn with_probe<R>(&self, name: &str, f: impl FnOnce(&mut ProbeLedger) -> R) -> R {
        let mut inner = self.lock();
        let ledger = inner
            .probes
            .entry(name.to_owned())
            .or_insert_with(|| ProbeLedger::new(name, &self.settings));
        f(ledger)
    }

    /// Upsert a metadata key on the named probe's ledger. Last write wins.
    pub fn log_probe_meta(
        &self,
        name: &str,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) {
        let value = value.into();
        self.with_probe(name, |ledger| {
            ledger.meta.insert(key.to_owned(), value);
        });
    }

    /// Append a created pod name to the run-level meta list, for operator
    /// debugging.
    pub fn log_pod_name(&self, pod_name: &str) {
        let mut inner = self.lock();
        let entry = inner
            .meta
            .entry("names of pods created".to_owned())
            .or_insert_with(|| serde_json::json!([]));
        if let Some(list) = entry.as_array_mut() {
            list.push(serde_json::Value::String(pod_name.to_owned()));
        }
    }

    /// Finalize the named probe: recompute scenario tallies, classify its
    /// terminal result, update run counters, and write its audit document.
    ///
    /// Classification priority: an externally forced "Excluded" result is
    /// Skipped; zero recorded scenarios is "No Scenarios Executed" and
    /// Skipped; zero failed scenarios is "Success" and Passed; otherwise
    /// "Failed" and Failed. The transition is guarded: a second call for
    /// the same probe is a logged no-op, so counters can never be written
    /// twice.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`AuditError`] when the audit document cannot be
    /// persisted under the configured overwrite policy.
    pub fn complete_probe(&self, name: &str) -> Result<(), AuditError> {
        let mut inner = self.lock();
        if !inner.probes.contains_key(name) {
            let ledger = ProbeLedger::new(name, &self.settings);
            inner.probes.insert(name.to_owned(), ledger);
        }

        // Split borrow: counters live beside the probes map.
        let SummaryInner {
            probes,
            probes_passed,
            probes_failed,
            probes_skipped,
            ..
        } = &mut *inner;
        let Some(ledger) = probes.get_mut(name) else {
            return Ok(());
        };

        if ledger.completed {
            tracing::warn!(probe = name, "complete_probe called twice, ignoring");
            return Ok(());
        }
        ledger.completed = true;
        ledger.recount();

        if ledger.result == RESULT_EXCLUDED {
            ledger
                .meta
                .insert("audit_path".to_owned(), serde_json::Value::String(String::new()));
            *probes_skipped = probes_skipped.saturating_add(1);
        } else if !ledger.scenario_ran() {
            ledger.result = RESULT_NO_SCENARIOS.to_owned();
            ledger
                .meta
                .insert("audit_path".to_owned(), serde_json::Value::String(String::new()));
            *probes_skipped = probes_skipped.saturating_add(1);
        } else if ledger.scenarios_failed == 0 {
            ledger.result = RESULT_SUCCESS.to_owned();
            *probes_passed = probes_passed.saturating_add(1);
        } else {
            ledger.result = RESULT_FAILED.to_owned();
            *probes_failed = probes_failed.saturating_add(1);
        }

        ledger.write_audit(&self.settings)
    }

    /// Derive the run-level status string from the current counters.
    pub fn set_status(&self) {
        let mut inner = self.lock();
        inner.status = if inner.probes_passed > 0 && inner.probes_failed == 0 {
            "Complete - All Probes Completed Successfully".to_owned()
        } else {
            let executed = inner.probes.len().saturating_sub(inner.probes_skipped);
            format!(
                "Complete - {} of {} Probes Failed",
                inner.probes_failed, executed
            )
        };
    }

    /// Non-destructive snapshot of the current state.
    pub fn snapshot(&self) -> SummarySnapshot {
        let inner = self.lock();
        SummarySnapshot {
            status: inner.status.clone(),
            probes_passed: inner.probes_passed,
            probes_failed: inner.probes_failed,
            probes_skipped: inner.probes_skipped,
            probes: inner.probes.clone(),
            meta: inner.meta.clone(),
        }
    }

    /// Print the run summary as indented JSON to stdout.
    ///
    /// This is the sole read path at run end. Suppressed (with a notice)
    /// when summary output is disabled by configuration. Summary output is
    /// not routed through log levels: operators consume it as a document.
    pub fn print_summary(&self) {
        if !self.settings.summary_enabled {
            tracing::info!("summary output suppressed by configuration");
            return;
        }
        let snapshot = self.snapshot();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => tracing::error!(error = %e, "failed to render run summary"),
        }
    }
}
