//! Cluster interaction: the narrow client surface, workload manifests, the
//! error-reason classifier, and the pod lifecycle controller.
//!
//! The engine and probes only ever see [`ClusterClient`]; the transport
//! behind it (REST, or a scripted fake in tests) is interchangeable.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

pub mod api;
pub mod classifier;
pub mod lifecycle;

pub use api::KubeApiClient;
pub use classifier::{ClassificationRule, PodCreationError, PodCreationErrorReason, ReasonTable};
pub use lifecycle::{PodError, PodLifecycle};

/// Lifecycle phase of a pod as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted but not all containers are running.
    Pending,
    /// Bound to a node with all containers started.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// All containers terminated, at least one in failure.
    Failed,
    /// State could not be obtained.
    Unknown,
}

/// The narrow view of a pod the controller needs: identity, phase, and any
/// container waiting reasons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    /// Pod name.
    pub name: String,
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Reported phase.
    pub phase: PodPhase,
    /// Waiting-state reasons across the pod's containers, in container
    /// order. Empty when no container is waiting.
    #[serde(default)]
    pub waiting_reasons: Vec<String>,
}

/// Kind of a pod watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchEventKind {
    /// Resource appeared.
    Added,
    /// Resource changed.
    Modified,
    /// Resource was removed.
    Deleted,
    /// Progress marker; carries no state change.
    Bookmark,
    /// The watch itself reported an error.
    Error,
}

/// One event observed on a pod watch stream.
#[derive(Debug, Clone)]
pub struct PodEvent {
    /// What happened.
    pub kind: WatchEventKind,
    /// State of the pod at the event.
    pub pod: Pod,
}

/// Stream of pod watch events.
pub type PodEventStream = Pin<Box<dyn Stream<Item = PodEvent> + Send>>;

/// Result from executing a command inside a pod.
///
/// `internal` marks failures raised before the command reached the cluster
/// (transport problems, unsupported exec path) as opposed to the command
/// itself exiting non-zero.
#[derive(Debug, Clone, Default)]
pub struct CmdExecutionResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Command exit code; `None` when the command never ran.
    pub exit_code: Option<i32>,
    /// True when the failure never reached the cluster.
    pub internal: bool,
}

/// Pod-level security context fields the probes exercise.
///
/// `None` leaves a field unset in the submitted manifest so the platform's
/// admission behavior, not a client-side default, is what gets tested.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityContext {
    /// Request a privileged container.
    pub privileged: Option<bool>,
    /// Allow the container to gain more privileges than its parent.
    pub allow_privilege_escalation: Option<bool>,
    /// UID to run the container entrypoint as.
    pub run_as_user: Option<i64>,
    /// Share the host PID namespace.
    pub host_pid: Option<bool>,
    /// Share the host IPC namespace.
    pub host_ipc: Option<bool>,
    /// Use the host's network namespace.
    pub host_network: Option<bool>,
    /// Linux capabilities to add.
    pub capabilities_add: Vec<String>,
}

impl SecurityContext {
    /// The restrictive context used for compliant workloads: unprivileged,
    /// no escalation, non-root user.
    pub fn restricted() -> Self {
        Self {
            privileged: Some(false),
            allow_privilege_escalation: Some(false),
            run_as_user: Some(1000),
            ..Self::default()
        }
    }
}

/// A fully-specified workload to submit to the cluster.
#[derive(Debug, Clone, Serialize)]
pub struct PodManifest {
    /// Generated pod name (base plus random suffix).
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Name of the single container.
    pub container_name: String,
    /// Container image reference.
    pub image: String,
    /// Container command.
    pub command: Vec<String>,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
    /// Pod annotations.
    pub annotations: BTreeMap<String, String>,
    /// Security context applied to the container (and host-namespace flags
    /// applied to the pod).
    pub security_context: SecurityContext,
}

impl PodManifest {
    /// Build the default probe workload shape: `app=demo` label, default
    /// seccomp annotation, long sleep so the pod stays Running, restricted
    /// security context, and a unique generated name.
    pub fn new(
        base_name: &str,
        namespace: impl Into<String>,
        container_name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_owned(), "demo".to_owned());
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "seccomp.security.alpha.kubernetes.io/pod".to_owned(),
            "runtime/default".to_owned(),
        );
        Self {
            name: generate_pod_name(base_name),
            namespace: namespace.into(),
            container_name: container_name.into(),
            image: image.into(),
            command: vec!["sleep".to_owned(), "3600".to_owned()],
            labels,
            annotations,
            security_context: SecurityContext::restricted(),
        }
    }

    /// Replace the security context.
    pub fn with_security_context(mut self, security_context: SecurityContext) -> Self {
        self.security_context = security_context;
        self
    }
}

/// Generate a unique pod name from a base: lowercase base plus a random
/// five-character suffix, so repeated scenario runs never collide.
fn generate_pod_name(base: &str) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            char::from(CHARSET[idx])
        })
        .collect();
    format!("{}-{suffix}", base.to_lowercase())
}

/// Errors surfaced by a [`ClusterClient`] transport.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The resource already exists (HTTP 409). Not a failure for creation
    /// flows: the caller fetches and reuses the existing resource.
    #[error("resource already exists")]
    AlreadyExists,
    /// The platform refused the request (HTTP 403); carries the full
    /// status message for classification.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Platform status message text.
        message: String,
    },
    /// The resource does not exist (HTTP 404).
    #[error("resource not found")]
    NotFound,
    /// Any other non-success platform response.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Platform status message text.
        message: String,
    },
    /// The request never produced a platform response.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// The narrow cluster surface the engine consumes.
///
/// CRUD + exec + watch, nothing else; callers never touch the underlying
/// transport.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create the namespace if it does not already exist. Idempotent.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ApiError>;

    /// Submit a pod for creation and return its observed state.
    async fn create_pod(&self, manifest: &PodManifest) -> Result<Pod, ApiError>;

    /// Fetch one pod by name.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ApiError>;

    /// List pods in a namespace.
    async fn get_pods(&self, namespace: &str) -> Result<Vec<Pod>, ApiError>;

    /// Delete one pod by name.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError>;

    /// Execute a command inside a running pod.
    async fn exec_command(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<CmdExecutionResult, ApiError>;

    /// Open a watch on all pods in a namespace.
    async fn watch_pods(&self, namespace: &str) -> Result<PodEventStream, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_defaults_match_the_probe_workload_shape() {
        let manifest = PodManifest::new("PSP-Demo", "probe-ns", "probe", "busybox:1.36");
        assert!(manifest.name.starts_with("psp-demo-"));
        assert_eq!(manifest.name.len(), "psp-demo-xxxxx".len());
        assert_eq!(manifest.labels.get("app").map(String::as_str), Some("demo"));
        assert_eq!(
            manifest
                .annotations
                .get("seccomp.security.alpha.kubernetes.io/pod")
                .map(String::as_str),
            Some("runtime/default")
        );
        assert_eq!(manifest.command, vec!["sleep", "3600"]);
        assert_eq!(manifest.security_context.privileged, Some(false));
        assert_eq!(manifest.security_context.run_as_user, Some(1000));
    }

    #[test]
    fn generated_names_are_unique() {
        let a = generate_pod_name("probe");
        let b = generate_pod_name("probe");
        // Five random characters: collisions are possible but vanishingly
        // unlikely; a stable equality here would mean the suffix is broken.
        assert_ne!(a, b);
    }
}
