//! The pod lifecycle controller.
//!
//! Creates a workload for a probe scenario, blocks on a watch stream until
//! a terminal condition, and classifies failures into the canonical reason
//! taxonomy. Nothing here retries: a denial or timeout is reported once and
//! retrying (with a different spec, or not at all) belongs to the calling
//! scenario.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_stream::StreamExt;

use super::classifier::{PodCreationError, ReasonTable};
use super::{ApiError, ClusterClient, CmdExecutionResult, Pod, PodEventStream, PodManifest, PodPhase};

/// Errors surfaced by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum PodError {
    /// The platform refused the workload; carries the classified reasons.
    #[error(transparent)]
    Creation(#[from] PodCreationError),
    /// The pod did not reach the requested phase within the wait bound
    /// (or the watch closed first). Distinct from both success and policy
    /// denial; never folded into either.
    #[error("timed out waiting for pod '{pod}' to reach phase {phase:?} after {seconds}s")]
    WaitTimeout {
        /// Pod being waited on.
        pod: String,
        /// Phase that was never observed.
        phase: PodPhase,
        /// The wait bound in seconds.
        seconds: u64,
    },
    /// An unclassified platform failure.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Drives pod creation, phase waits, deletion, and cleanup for scenarios.
pub struct PodLifecycle {
    client: Arc<dyn ClusterClient>,
    table: ReasonTable,
    wait_timeout: Duration,
    created: Mutex<Vec<(String, String)>>,
}

impl PodLifecycle {
    /// Create a controller over the given client and classification table.
    ///
    /// `wait_timeout` bounds every phase/delete wait (one minute in the
    /// default configuration).
    pub fn new(client: Arc<dyn ClusterClient>, table: ReasonTable, wait_timeout: Duration) -> Self {
        Self {
            client,
            table,
            wait_timeout,
            created: Mutex::new(Vec::new()),
        }
    }

    /// The classification table in use.
    pub fn reason_table(&self) -> &ReasonTable {
        &self.table
    }

    /// Create a pod from the manifest, optionally blocking until it runs.
    ///
    /// The namespace is created first (idempotent). An already-existing pod
    /// is not an error: the existing resource is fetched and returned, with
    /// no wait. A forbidden response is terminal and classified immediately;
    /// no wait is attempted.
    ///
    /// # Errors
    ///
    /// [`PodError::Creation`] for policy denials (classified, possibly with
    /// an empty reason set when no rule matched the message),
    /// [`PodError::WaitTimeout`] when the phase wait expires, and
    /// [`PodError::Api`] for any other platform failure.
    pub async fn create_pod(&self, manifest: &PodManifest, wait: bool) -> Result<Pod, PodError> {
        self.client
            .ensure_namespace(&manifest.namespace)
            .await
            .map_err(PodError::Api)?;

        tracing::info!(pod = %manifest.name, namespace = %manifest.namespace, "creating pod");
        let pod = match self.client.create_pod(manifest).await {
            Ok(pod) => pod,
            Err(ApiError::AlreadyExists) => {
                tracing::info!(pod = %manifest.name, "pod already exists, returning existing");
                return self
                    .client
                    .get_pod(&manifest.namespace, &manifest.name)
                    .await
                    .map_err(PodError::Api);
            }
            Err(ApiError::Forbidden { message }) => {
                tracing::info!(pod = %manifest.name, %message, "pod creation forbidden");
                let reasons = self.table.classify(&message);
                return Err(PodCreationError { message, reasons }.into());
            }
            Err(e) => return Err(PodError::Api(e)),
        };

        self.record_created(&manifest.namespace, &manifest.name);

        if wait {
            self.wait_for_phase(PodPhase::Running, &manifest.namespace, &manifest.name)
                .await?;
        }

        Ok(pod)
    }

    /// Block until the named pod reaches `phase`, bounded by the wait
    /// timeout.
    ///
    /// Events for other pods are ignored. A container Waiting reason found
    /// in the terminal table aborts the wait immediately with a classified
    /// error rather than letting the timeout expire on a pod that will
    /// never start.
    ///
    /// # Errors
    ///
    /// [`PodError::Creation`] on a terminal waiting reason;
    /// [`PodError::WaitTimeout`] when the bound expires or the watch closes
    /// before the phase is observed.
    pub async fn wait_for_phase(
        &self,
        phase: PodPhase,
        namespace: &str,
        name: &str,
    ) -> Result<(), PodError> {
        let stream = self
            .client
            .watch_pods(namespace)
            .await
            .map_err(PodError::Api)?;

        tracing::info!(pod = name, ?phase, "waiting for pod phase");
        let observed =
            tokio::time::timeout(self.wait_timeout, self.observe_until_phase(stream, phase, name))
                .await;
        match observed {
            Ok(result) => result,
            Err(_elapsed) => Err(self.wait_timeout_error(name, phase)),
        }
    }

    async fn observe_until_phase(
        &self,
        mut stream: PodEventStream,
        phase: PodPhase,
        name: &str,
    ) -> Result<(), PodError> {
        while let Some(event) = stream.next().await {
            if event.pod.name != name {
                tracing::debug!(pod = %event.pod.name, "event for unrelated pod, skipping");
                continue;
            }
            tracing::debug!(pod = name, kind = ?event.kind, observed = ?event.pod.phase, "watch event");

            for reason in &event.pod.waiting_reasons {
                if let Some(code) = self.table.terminal_waiting(reason) {
                    tracing::warn!(pod = name, reason = %reason, "giving up waiting on pod");
                    let mut reasons = std::collections::BTreeSet::new();
                    reasons.insert(code);
                    return Err(PodCreationError {
                        message: format!(
                            "giving up waiting on pod '{name}': container waiting reason '{reason}'"
                        ),
                        reasons,
                    }
                    .into());
                }
            }

            if event.pod.phase == phase {
                tracing::info!(pod = name, ?phase, "pod reached phase");
                return Ok(());
            }
        }
        // The watch closed before the phase was observed.
        Err(self.wait_timeout_error(name, phase))
    }

    fn wait_timeout_error(&self, name: &str, phase: PodPhase) -> PodError {
        PodError::WaitTimeout {
            pod: name.to_owned(),
            phase,
            seconds: self.wait_timeout.as_secs(),
        }
    }

    /// Delete the named pod, optionally waiting for the Deleted event so
    /// the caller can count the destruction.
    ///
    /// # Errors
    ///
    /// [`PodError::Api`] when deletion is refused and
    /// [`PodError::WaitTimeout`] when the delete wait expires.
    pub async fn delete_pod(&self, namespace: &str, name: &str, wait: bool) -> Result<(), PodError> {
        if wait {
            // Watch first so the Deleted event cannot slip past between the
            // delete call and the watch being established.
            let stream = self
                .client
                .watch_pods(namespace)
                .await
                .map_err(PodError::Api)?;
            self.client
                .delete_pod(namespace, name)
                .await
                .map_err(PodError::Api)?;
            let observed = tokio::time::timeout(
                self.wait_timeout,
                Self::observe_until_deleted(stream, name),
            )
            .await;
            match observed {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    return Err(self.wait_timeout_error(name, PodPhase::Unknown));
                }
            }
        } else {
            self.client
                .delete_pod(namespace, name)
                .await
                .map_err(PodError::Api)?;
        }

        self.forget_created(namespace, name);
        tracing::info!(pod = name, namespace, "pod deleted");
        Ok(())
    }

    async fn observe_until_deleted(mut stream: PodEventStream, name: &str) -> bool {
        while let Some(event) = stream.next().await {
            if event.pod.name == name && event.kind == super::WatchEventKind::Deleted {
                return true;
            }
        }
        false
    }

    /// List pods in a namespace (scenario given-steps use this as a
    /// reachability check).
    ///
    /// # Errors
    ///
    /// [`PodError::Api`] when the list call fails.
    pub async fn get_pods(&self, namespace: &str) -> Result<Vec<Pod>, PodError> {
        self.client.get_pods(namespace).await.map_err(PodError::Api)
    }

    /// Execute a command inside a pod.
    ///
    /// # Errors
    ///
    /// [`PodError::Api`] when the exec call fails outright; transport-level
    /// refusals are reported inside the result with `internal` set.
    pub async fn exec_command(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<CmdExecutionResult, PodError> {
        self.client
            .exec_command(namespace, pod, command)
            .await
            .map_err(PodError::Api)
    }

    /// Best-effort deletion of every pod this controller created and has
    /// not already deleted. Used by the interrupt handler; failures are
    /// logged and swallowed.
    pub async fn cleanup(&self) {
        let pods = {
            let mut created = self.lock_created();
            std::mem::take(&mut *created)
        };
        for (namespace, name) in pods {
            match self.client.delete_pod(&namespace, &name).await {
                Ok(()) => tracing::info!(pod = %name, %namespace, "cleaned up pod"),
                Err(e) => {
                    tracing::warn!(pod = %name, %namespace, error = %e, "cleanup delete failed");
                }
            }
        }
    }

    fn record_created(&self, namespace: &str, name: &str) {
        self.lock_created()
            .push((namespace.to_owned(), name.to_owned()));
    }

    fn forget_created(&self, namespace: &str, name: &str) {
        self.lock_created()
            .retain(|(ns, n)| !(ns == namespace && n == name));
    }

    fn lock_created(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        match self.created.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
