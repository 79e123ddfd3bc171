//! Probe registration and execution.
//!
//! A probe is a named, independently runnable collection of scenarios
//! testing one security/compliance concern. The [`registry::ProbeRegistry`]
//! owns every registered probe and runs them one at a time; a probe that
//! fails or errors never prevents the rest of the batch from running.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod registry;
pub mod runner;

pub use registry::ProbeRegistry;
pub use runner::{ScenarioRunner, SuiteOutcome};

use crate::audit::AuditError;

/// Functional grouping of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeGroup {
    /// Probes exercising the container orchestrator itself.
    Kubernetes,
    /// Probes exercising the cloud provider control plane.
    CloudDriver,
    /// Probes exercising the runner's own machinery.
    CoreEngine,
}

impl fmt::Display for ProbeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Kubernetes => "kubernetes",
            Self::CloudDriver => "clouddriver",
            Self::CoreEngine => "coreengine",
        };
        f.write_str(s)
    }
}

/// Execution status of a registered probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeStatus {
    /// Registered, not yet executed.
    Pending,
    /// Currently executing.
    Running,
    /// Executed; suite exit status was zero.
    CompleteSuccess,
    /// Executed; suite exit status was non-zero.
    CompleteFail,
    /// Execution itself failed (runner error or panic).
    Error,
    /// Matched a tag exclusion at registration; never executed.
    Excluded,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Identity of a probe: group plus unique name. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    /// Group the probe belongs to.
    pub group: ProbeGroup,
    /// Unique probe name; the registry key and audit document name.
    pub name: String,
}

impl ProbeDescriptor {
    /// Create a descriptor.
    pub fn new(group: ProbeGroup, name: impl Into<String>) -> Self {
        Self {
            group,
            name: name.into(),
        }
    }

    /// True when the probe's name or group matches a configured exclusion.
    pub(crate) fn is_excluded(&self, exclusions: &[String]) -> bool {
        exclusions
            .iter()
            .any(|tag| *tag == self.name || *tag == self.group.to_string())
    }
}

/// A registered probe: descriptor, live status, captured suite output, and
/// the opaque runner that executes its scenarios. Owned exclusively by the
/// registry.
#[derive(Clone)]
pub struct Probe {
    /// Identity of the probe.
    pub descriptor: ProbeDescriptor,
    /// Current execution status.
    pub status: ProbeStatus,
    /// Captured suite output from the last run, if any.
    pub results: String,
    pub(crate) runner: Arc<dyn ScenarioRunner>,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("descriptor", &self.descriptor)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Errors raised by probe registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The named probe is not registered. The engine never synthesizes a
    /// placeholder for execution; only the audit side initializes lazily.
    #[error("probe with name '{0}' not found")]
    NotFound(String),
    /// The scenario suite could not be executed.
    #[error("scenario suite failed: {0}")]
    Suite(String),
    /// A fatal audit configuration error surfaced during completion.
    #[error(transparent)]
    Audit(#[from] AuditError),
}
