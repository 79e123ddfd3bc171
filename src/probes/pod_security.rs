//! Pod security probe.
//!
//! Verifies that the cluster's admission policy refuses over-privileged
//! workloads and still admits a compliant one. Three scenarios:
//!
//! 1. a privileged container is denied,
//! 2. a pod sharing the host PID namespace is denied,
//! 3. a restricted workload is admitted, reaches Running, and is torn down.
//!
//! Every step is recorded through the audit trail; a panicking step body is
//! converted into a recorded failure by the guard wrapper.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;

use crate::audit::{guarded, StepError, Summary};
use crate::cluster::{
    PodCreationErrorReason, PodError, PodLifecycle, PodManifest, SecurityContext,
};
use crate::config::PalisadeConfig;
use crate::engine::{
    EngineError, ProbeDescriptor, ProbeGroup, ScenarioRunner, SuiteOutcome,
};

use super::record_step;

/// Registry name of the pod security probe.
pub const NAME: &str = "pod_security";

/// The pod security probe.
pub struct PodSecurityProbe {
    lifecycle: Arc<PodLifecycle>,
    namespace: String,
    image: String,
}

impl PodSecurityProbe {
    /// Identity under which this probe registers.
    pub fn descriptor() -> ProbeDescriptor {
        ProbeDescriptor::new(ProbeGroup::Kubernetes, NAME)
    }

    /// Build the probe over a lifecycle controller and the loaded config.
    pub fn new(lifecycle: Arc<PodLifecycle>, config: &PalisadeConfig) -> Self {
        Self {
            lifecycle,
            namespace: config.cluster.namespace.clone(),
            image: config.cluster.default_image.clone(),
        }
    }

    /// Given-step shared by every scenario: the cluster answers a pod list.
    async fn step_cluster_reachable(
        &self,
        summary: &Arc<Summary>,
        scenario: usize,
    ) -> bool {
        let lifecycle = Arc::clone(&self.lifecycle);
        let namespace = self.namespace.clone();
        let outcome = guarded(move || async move {
            let pods = lifecycle
                .get_pods(&namespace)
                .await
                .map_err(|e| StepError::new(format!("cluster is not reachable: {e}")))?;
            Ok(serde_json::json!({ "namespace": namespace, "pods": pods.len() }))
        })
        .await;
        record_step(
            summary,
            NAME,
            scenario,
            "step_cluster_reachable",
            "a Kubernetes cluster is deployed",
            "listed pods in the probe namespace to confirm the cluster can be reached",
            &outcome,
        )
    }

    /// When-step: request a pod that the admission policy must refuse,
    /// expecting `expected` among the classified reasons.
    async fn step_creation_denied_with(
        &self,
        summary: &Arc<Summary>,
        scenario: usize,
        manifest: PodManifest,
        expected: PodCreationErrorReason,
        function: &str,
        step: &str,
    ) -> bool {
        let lifecycle = Arc::clone(&self.lifecycle);
        let namespace = self.namespace.clone();
        let outcome = guarded(move || async move {
            match lifecycle.create_pod(&manifest, true).await {
                Ok(pod) => {
                    // The policy under test let the workload through; remove
                    // it so the cluster is not left holding our mistake.
                    let _ = lifecycle.delete_pod(&namespace, &pod.name, false).await;
                    Err(StepError::new(format!(
                        "pod '{}' was admitted; expected the policy to refuse it",
                        pod.name
                    )))
                }
                Err(PodError::Creation(denial)) if denial.has_reason(expected) => {
                    Ok(serde_json::json!({
                        "reasons": denial
                            .reasons
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>(),
                        "message": denial.message,
                    }))
                }
                Err(PodError::Creation(denial)) => Err(StepError::new(format!(
                    "creation was refused but not for the expected reason ({expected}): {denial}"
                ))),
                Err(e) => Err(StepError::new(format!(
                    "expected a policy denial, got: {e}"
                ))),
            }
        })
        .await;
        record_step(
            summary,
            NAME,
            scenario,
            function,
            step,
            "requested a non-compliant pod and expected a classified policy denial",
            &outcome,
        )
    }

    async fn scenario_privileged_denied(&self, summary: &Arc<Summary>) -> bool {
        let scenario = summary.with_probe(NAME, |l| {
            l.start_scenario(
                "privileged container creation is denied",
                &["@k-psp", "@k-psp-001"],
            )
        });
        if !self.step_cluster_reachable(summary, scenario).await {
            return false;
        }
        let manifest = PodManifest::new("psp-priv", &self.namespace, "probe", &self.image)
            .with_security_context(SecurityContext {
                privileged: Some(true),
                allow_privilege_escalation: Some(true),
                ..SecurityContext::default()
            });
        self.step_creation_denied_with(
            summary,
            scenario,
            manifest,
            PodCreationErrorReason::PspNoPrivilege,
            "step_privileged_pod_denied",
            "pod creation with privileged access is refused",
        )
        .await
    }

    async fn scenario_host_pid_denied(&self, summary: &Arc<Summary>) -> bool {
        let scenario = summary.with_probe(NAME, |l| {
            l.start_scenario(
                "host PID namespace access is denied",
                &["@k-psp", "@k-psp-002"],
            )
        });
        if !self.step_cluster_reachable(summary, scenario).await {
            return false;
        }
        let manifest = PodManifest::new("psp-hostpid", &self.namespace, "probe", &self.image)
            .with_security_context(SecurityContext {
                host_pid: Some(true),
                ..SecurityContext::restricted()
            });
        self.step_creation_denied_with(
            summary,
            scenario,
            manifest,
            PodCreationErrorReason::PspHostNamespace,
            "step_host_pid_pod_denied",
            "pod creation with host PID namespace access is refused",
        )
        .await
    }

    async fn scenario_compliant_workload_admitted(&self, summary: &Arc<Summary>) -> bool {
        let scenario = summary.with_probe(NAME, |l| {
            l.start_scenario(
                "a compliant workload is admitted",
                &["@k-psp", "@k-psp-003"],
            )
        });
        if !self.step_cluster_reachable(summary, scenario).await {
            return false;
        }

        let manifest = PodManifest::new("psp-ok", &self.namespace, "probe", &self.image);
        let pod_name = manifest.name.clone();
        let lifecycle = Arc::clone(&self.lifecycle);
        let created = guarded(move || async move {
            let pod = lifecycle
                .create_pod(&manifest, true)
                .await
                .map_err(|e| StepError::new(format!("compliant pod was not admitted: {e}")))?;
            Ok(serde_json::json!({ "pod": pod.name, "phase": pod.phase }))
        })
        .await;
        let create_ok = record_step(
            summary,
            NAME,
            scenario,
            "step_compliant_pod_admitted",
            "a compliant pod reaches the running phase",
            "created a restricted workload and waited for it to run",
            &created,
        );
        if !create_ok {
            return false;
        }
        summary.with_probe(NAME, |l| l.count_pod_created());
        summary.log_pod_name(&pod_name);

        let lifecycle = Arc::clone(&self.lifecycle);
        let namespace = self.namespace.clone();
        let deleted_name = pod_name.clone();
        let deleted = guarded(move || async move {
            lifecycle
                .delete_pod(&namespace, &deleted_name, true)
                .await
                .map_err(|e| StepError::new(format!("pod teardown failed: {e}")))?;
            Ok(serde_json::json!({ "pod": deleted_name }))
        })
        .await;
        let delete_ok = record_step(
            summary,
            NAME,
            scenario,
            "step_pod_torn_down",
            "the workload is deleted again",
            "deleted the workload and waited for the deletion event",
            &deleted,
        );
        if delete_ok {
            summary.with_probe(NAME, |l| l.count_pod_destroyed());
        }
        delete_ok
    }
}

#[async_trait]
impl ScenarioRunner for PodSecurityProbe {
    async fn run(
        &self,
        _probe: &ProbeDescriptor,
        summary: Arc<Summary>,
    ) -> Result<SuiteOutcome, EngineError> {
        let mut output = String::new();
        let mut failed = 0_usize;

        let scenarios = [
            (
                "privileged container creation is denied",
                self.scenario_privileged_denied(&summary).await,
            ),
            (
                "host PID namespace access is denied",
                self.scenario_host_pid_denied(&summary).await,
            ),
            (
                "a compliant workload is admitted",
                self.scenario_compliant_workload_admitted(&summary).await,
            ),
        ];

        for (name, passed) in scenarios {
            if !passed {
                failed = failed.saturating_add(1);
            }
            let _ = writeln!(
                output,
                "scenario '{name}': {}",
                if passed { "passed" } else { "failed" }
            );
        }

        // Suite exit status mirrors a cucumber runner: the count of failing
        // scenarios, zero when everything passed.
        let status = i32::try_from(failed).unwrap_or(i32::MAX);
        Ok(SuiteOutcome { status, output })
    }
}
