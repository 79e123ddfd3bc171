//! Audit trail recording and run-level summary aggregation.
//!
//! Three layers, leaves first:
//! - [`trail`] — per-scenario step ledger with deterministic result
//!   derivation, serialized as one JSON document per probe.
//! - [`ledger`] — per-probe counters (pods created/destroyed, scenario
//!   tallies) wrapping the trail.
//! - [`summary`] — run-wide aggregator keyed by probe name, lazily
//!   initialized, read once at run end to print the summary and decide the
//!   process exit code.
//!
//! [`guard::guarded`] wraps step bodies so a panicking step is still
//! converted into a recordable error before it reaches the trail.

use std::path::PathBuf;

pub mod guard;
pub mod ledger;
pub mod summary;
pub mod trail;

pub use guard::{guarded, StepError};
pub use ledger::ProbeLedger;
pub use summary::{Summary, SummarySnapshot};
pub use trail::{ScenarioAudit, ScenarioResult, StepAudit, StepResult};

use crate::config::AuditConfig;

/// Audit output policy, copied from configuration at startup.
#[derive(Debug, Clone)]
pub struct AuditSettings {
    /// Directory receiving one `{probe}.json` document per probe.
    pub dir: PathBuf,
    /// Whether audit documents are written at all.
    pub enabled: bool,
    /// Whether a pre-existing audit document may be overwritten.
    pub overwrite_historical: bool,
    /// Whether the run summary is printed at completion.
    pub summary_enabled: bool,
}

impl AuditSettings {
    /// Build settings from the loaded configuration section.
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            enabled: config.enabled,
            overwrite_historical: config.overwrite_historical,
            summary_enabled: config.summary_enabled,
        }
    }
}

/// Errors raised while recording or persisting audit state.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// An audit document already exists and overwriting is disabled.
    ///
    /// Historical audits are preserved by default; conflating two runs'
    /// trails is worse than halting, so this is fatal.
    #[error(
        "audit document already exists at '{path}' and overwriting historical audits is disabled"
    )]
    HistoricalAuditConflict {
        /// Path of the conflicting document.
        path: String,
    },
    /// The audit document could not be written.
    #[error("failed to write audit document '{path}': {source}")]
    Io {
        /// Target path of the failed write.
        path: String,
        /// Underlying filesystem error.
        source: std::io::Error,
    },
    /// The audit document could not be serialized.
    #[error("failed to serialize audit document for probe '{probe}': {source}")]
    Serialize {
        /// Probe whose document failed to serialize.
        probe: String,
        /// Underlying serialization error.
        source: serde_json::Error,
    },
}

/// Strip internal log-level prefixes from an error message before it is
/// persisted in the audit trail.
pub(crate) fn strip_log_prefixes(message: &str) -> String {
    let mut out = message.to_owned();
    for prefix in ["[ERROR] ", "[WARN] ", "[NOTICE] ", "[INFO] ", "[DEBUG] "] {
        out = out.replace(prefix, "");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_all_log_level_prefixes() {
        assert_eq!(
            strip_log_prefixes("[ERROR] creation denied: [WARN] policy refused"),
            "creation denied: policy refused"
        );
        assert_eq!(strip_log_prefixes("plain message"), "plain message");
    }
}
