//! The scenario-runner collaborator interface.
//!
//! The engine treats scenario execution as opaque: a runner is handed the
//! probe's identity and the run summary, executes its suite however it
//! likes, and reports back an integer exit status plus captured output.
//! Step recording happens inside the runner via the audit API; the engine
//! only folds exit statuses.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audit::Summary;

use super::{EngineError, ProbeDescriptor};

/// Result of one suite execution.
#[derive(Debug, Clone, Default)]
pub struct SuiteOutcome {
    /// Suite exit status. Zero is success; any positive value is failure.
    pub status: i32,
    /// Captured suite output, stored on the probe for later inspection.
    pub output: String,
}

impl SuiteOutcome {
    /// An outcome carrying only an exit status.
    pub fn with_status(status: i32) -> Self {
        Self {
            status,
            output: String::new(),
        }
    }
}

/// Executes the scenario suite for one probe.
///
/// Implementations record scenarios and steps against the summary's probe
/// ledger; the engine never inspects how.
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    /// Run the suite and return its exit status and captured output.
    async fn run(
        &self,
        probe: &ProbeDescriptor,
        summary: Arc<Summary>,
    ) -> Result<SuiteOutcome, EngineError>;
}
