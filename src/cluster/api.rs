//! REST transport for the cluster client trait.
//!
//! Talks to the Kubernetes HTTP API directly (e.g. through `kubectl proxy`
//! or with a bearer token against the API server). Only the narrow surface
//! the engine consumes is implemented: pod CRUD, namespace ensure, and a
//! streaming watch decoded line by line.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use url::Url;

use crate::config::ClusterConfig;

use super::{
    ApiError, ClusterClient, CmdExecutionResult, Pod, PodEvent, PodEventStream, PodManifest,
    PodPhase, WatchEventKind,
};

/// Cluster client backed by the Kubernetes REST API.
#[derive(Debug, Clone)]
pub struct KubeApiClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    request_timeout: Duration,
}

impl KubeApiClient {
    /// Build a client from the cluster configuration.
    ///
    /// The HTTP client carries no global timeout: watch requests stream
    /// indefinitely and are bounded by the caller instead. Non-watch calls
    /// get the configured per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the API URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &ClusterConfig) -> Result<Self, ApiError> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| ApiError::Transport(format!("invalid api_url '{}': {e}", config.api_url)))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base,
            token: config.bearer_token.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid api path '{path}': {e}")))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn into_api_error(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let message = match response.json::<K8sStatus>().await {
            Ok(body) => body.message,
            Err(_) => String::new(),
        };
        map_status(status, message)
    }
}

/// Map a platform status code onto the client error taxonomy. 409 and 403
/// get dedicated variants because callers branch on them.
fn map_status(status: u16, message: String) -> ApiError {
    match status {
        403 => ApiError::Forbidden { message },
        404 => ApiError::NotFound,
        409 => ApiError::AlreadyExists,
        _ => ApiError::Api { status, message },
    }
}

#[async_trait]
impl ClusterClient for KubeApiClient {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ApiError> {
        let url = self.url("api/v1/namespaces")?;
        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace },
        });
        let response = self
            .authorize(self.http.post(url))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }
        match Self::into_api_error(response).await {
            // The namespace being there already is the goal state.
            ApiError::AlreadyExists => Ok(()),
            e => Err(e),
        }
    }

    async fn create_pod(&self, manifest: &PodManifest) -> Result<Pod, ApiError> {
        let url = self.url(&format!("api/v1/namespaces/{}/pods", manifest.namespace))?;
        let response = self
            .authorize(self.http.post(url))
            .timeout(self.request_timeout)
            .json(&manifest_to_k8s(manifest))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }
        let pod: K8sPod = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(to_pod(pod))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ApiError> {
        let url = self.url(&format!("api/v1/namespaces/{namespace}/pods/{name}"))?;
        let response = self
            .authorize(self.http.get(url))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }
        let pod: K8sPod = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(to_pod(pod))
    }

    async fn get_pods(&self, namespace: &str) -> Result<Vec<Pod>, ApiError> {
        let url = self.url(&format!("api/v1/namespaces/{namespace}/pods"))?;
        let response = self
            .authorize(self.http.get(url))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }
        let list: K8sPodList = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(list.items.into_iter().map(to_pod).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("api/v1/namespaces/{namespace}/pods/{name}"))?;
        let response = self
            .authorize(self.http.delete(url))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::into_api_error(response).await)
        }
    }

    async fn exec_command(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<CmdExecutionResult, ApiError> {
        // The exec subresource needs a streaming protocol upgrade this
        // transport does not speak; report it as an internal failure so the
        // scenario can tell "never reached the cluster" from a command that
        // ran and failed.
        tracing::debug!(pod, namespace, ?command, "exec requested over plain REST transport");
        Ok(CmdExecutionResult {
            stdout: String::new(),
            stderr: "exec requires a streaming transport; the REST client cannot upgrade"
                .to_owned(),
            exit_code: None,
            internal: true,
        })
    }

    async fn watch_pods(&self, namespace: &str) -> Result<PodEventStream, ApiError> {
        let mut url = self.url(&format!("api/v1/namespaces/{namespace}/pods"))?;
        url.query_pairs_mut().append_pair("watch", "true");

        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }

        // Decode the chunked watch body into events on a dedicated task;
        // the receiver half is the stream handed to the controller.
        let (tx, rx) = tokio::sync::mpsc::channel::<PodEvent>(16);
        let mut body = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!(error = %e, "watch body ended");
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if line.len() <= 1 {
                        continue;
                    }
                    match serde_json::from_slice::<K8sWatchEvent>(&line) {
                        Ok(event) => {
                            let event = PodEvent {
                                kind: parse_event_kind(&event.kind),
                                pod: to_pod(event.object),
                            };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "undecodable watch line, skipping");
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// ── Wire types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct K8sStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct K8sWatchEvent {
    #[serde(rename = "type")]
    kind: String,
    object: K8sPod,
}

#[derive(Debug, Deserialize)]
struct K8sPodList {
    #[serde(default)]
    items: Vec<K8sPod>,
}

#[derive(Debug, Deserialize)]
struct K8sPod {
    metadata: K8sMeta,
    #[serde(default)]
    status: K8sPodStatus,
}

#[derive(Debug, Deserialize)]
struct K8sMeta {
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct K8sPodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default, rename = "containerStatuses")]
    container_statuses: Vec<K8sContainerStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct K8sContainerStatus {
    #[serde(default)]
    state: K8sContainerState,
}

#[derive(Debug, Default, Deserialize)]
struct K8sContainerState {
    #[serde(default)]
    waiting: Option<K8sWaitingState>,
}

#[derive(Debug, Deserialize)]
struct K8sWaitingState {
    #[serde(default)]
    reason: String,
}

fn parse_phase(phase: Option<&str>) -> PodPhase {
    match phase {
        Some("Pending") => PodPhase::Pending,
        Some("Running") => PodPhase::Running,
        Some("Succeeded") => PodPhase::Succeeded,
        Some("Failed") => PodPhase::Failed,
        _ => PodPhase::Unknown,
    }
}

fn parse_event_kind(kind: &str) -> WatchEventKind {
    match kind {
        "ADDED" => WatchEventKind::Added,
        "MODIFIED" => WatchEventKind::Modified,
        "DELETED" => WatchEventKind::Deleted,
        "BOOKMARK" => WatchEventKind::Bookmark,
        _ => WatchEventKind::Error,
    }
}

fn to_pod(pod: K8sPod) -> Pod {
    let waiting_reasons = pod
        .status
        .container_statuses
        .iter()
        .filter_map(|c| c.state.waiting.as_ref())
        .filter(|w| !w.reason.is_empty())
        .map(|w| w.reason.clone())
        .collect();
    Pod {
        name: pod.metadata.name,
        namespace: pod.metadata.namespace,
        phase: parse_phase(pod.status.phase.as_deref()),
        waiting_reasons,
    }
}

/// Render a manifest as a platform pod object.
fn manifest_to_k8s(manifest: &PodManifest) -> serde_json::Value {
    let sc = &manifest.security_context;
    let mut container_sc = serde_json::Map::new();
    if let Some(privileged) = sc.privileged {
        container_sc.insert("privileged".to_owned(), privileged.into());
    }
    if let Some(escalation) = sc.allow_privilege_escalation {
        container_sc.insert("allowPrivilegeEscalation".to_owned(), escalation.into());
    }
    if let Some(uid) = sc.run_as_user {
        container_sc.insert("runAsUser".to_owned(), uid.into());
    }
    if !sc.capabilities_add.is_empty() {
        container_sc.insert(
            "capabilities".to_owned(),
            serde_json::json!({ "add": sc.capabilities_add }),
        );
    }

    let mut spec = serde_json::Map::new();
    if let Some(host_pid) = sc.host_pid {
        spec.insert("hostPID".to_owned(), host_pid.into());
    }
    if let Some(host_ipc) = sc.host_ipc {
        spec.insert("hostIPC".to_owned(), host_ipc.into());
    }
    if let Some(host_network) = sc.host_network {
        spec.insert("hostNetwork".to_owned(), host_network.into());
    }
    spec.insert(
        "containers".to_owned(),
        serde_json::json!([{
            "name": manifest.container_name,
            "image": manifest.image,
            "imagePullPolicy": "IfNotPresent",
            "command": manifest.command,
            "securityContext": container_sc,
        }]),
    );

    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": manifest.name,
            "namespace": manifest.namespace,
            "labels": manifest.labels,
            "annotations": manifest.annotations,
        },
        "spec": spec,
    })
}
