//! Built-in probes.
//!
//! A probe's business logic is deliberately thin: scenarios drive the pod
//! lifecycle controller and record every step through the audit API. The
//! engine knows nothing about any of this; it sees only a
//! [`ScenarioRunner`](crate::engine::ScenarioRunner).

use std::sync::Arc;

use crate::audit::{StepError, Summary};
use crate::cluster::PodLifecycle;
use crate::config::PalisadeConfig;
use crate::engine::{ProbeDescriptor, ProbeRegistry};

pub mod pod_security;

pub use pod_security::PodSecurityProbe;

/// Descriptors of every built-in probe, for listing without a cluster.
pub fn builtin_descriptors() -> Vec<ProbeDescriptor> {
    vec![PodSecurityProbe::descriptor()]
}

/// Register every built-in probe against the registry.
pub fn register_builtin(
    registry: &ProbeRegistry,
    summary: &Summary,
    lifecycle: &Arc<PodLifecycle>,
    config: &PalisadeConfig,
) {
    registry.register(
        PodSecurityProbe::descriptor(),
        Arc::new(PodSecurityProbe::new(Arc::clone(lifecycle), config)),
        summary,
    );
}

/// Record one step outcome against a probe's scenario ledger and report
/// whether the step passed.
pub(crate) fn record_step(
    summary: &Summary,
    probe: &str,
    scenario: usize,
    function: &str,
    step: &str,
    description: &str,
    outcome: &Result<serde_json::Value, StepError>,
) -> bool {
    let (payload, err): (serde_json::Value, Option<&StepError>) = match outcome {
        Ok(payload) => (payload.clone(), None),
        Err(e) => (serde_json::Value::Null, Some(e)),
    };
    summary.with_probe(probe, |ledger| {
        ledger.audit_step(scenario, function, step, description, payload, err);
    });
    outcome.is_ok()
}
