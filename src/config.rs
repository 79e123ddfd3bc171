//! Configuration loading and management.
//!
//! Loads palisade configuration from `./palisade.toml` (or
//! `$PALISADE_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level palisade configuration loaded from TOML.
///
/// Path: `./palisade.toml` or `$PALISADE_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PalisadeConfig {
    /// Audit trail and summary output settings (`[audit]`).
    pub audit: AuditConfig,
    /// Cluster endpoint settings (`[cluster]`).
    pub cluster: ClusterConfig,
    /// Probe execution settings (`[engine]`).
    pub engine: EngineConfig,
}

/// Audit trail and summary output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory receiving one `{probe}.json` audit document per probe.
    pub dir: String,
    /// Whether audit documents are written at all.
    pub enabled: bool,
    /// Whether an existing audit document at the target path may be
    /// overwritten. When false, a pre-existing file is a fatal error.
    pub overwrite_historical: bool,
    /// Whether the run summary is printed at completion.
    pub summary_enabled: bool,
    /// Directory receiving rotated JSON log files.
    pub logs_dir: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: "audit".to_owned(),
            enabled: true,
            overwrite_historical: false,
            summary_enabled: true,
            logs_dir: "logs".to_owned(),
        }
    }
}

/// Cluster endpoint settings for the REST transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URL of the cluster API server (e.g. a `kubectl proxy` endpoint).
    pub api_url: String,
    /// Optional bearer token sent with every request.
    pub bearer_token: Option<String>,
    /// Namespace in which probe workloads are created.
    pub namespace: String,
    /// Container image used for generated probe workloads.
    pub default_image: String,
    /// Per-request timeout in seconds for non-watch calls.
    pub request_timeout_seconds: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_owned(),
            bearer_token: None,
            namespace: "palisade-probe".to_owned(),
            default_image: "busybox:1.36".to_owned(),
            request_timeout_seconds: 10,
        }
    }
}

/// Probe execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Probes whose name or group matches an entry are registered as
    /// Excluded and never executed.
    pub tag_exclusions: Vec<String>,
    /// Hard bound, in seconds, on any single pod-phase wait.
    pub wait_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tag_exclusions: Vec::new(),
            wait_timeout_seconds: 60,
        }
    }
}

impl PalisadeConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$PALISADE_CONFIG_PATH` or `./palisade.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the config file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: PalisadeConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(PalisadeConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("PALISADE_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("palisade.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Audit.
        if let Some(v) = env("PALISADE_AUDIT_DIR") {
            self.audit.dir = v;
        }
        if let Some(v) = env("PALISADE_AUDIT_ENABLED") {
            match v.parse() {
                Ok(b) => self.audit.enabled = b,
                Err(_) => warn_invalid("PALISADE_AUDIT_ENABLED", &v),
            }
        }
        if let Some(v) = env("PALISADE_OVERWRITE_AUDITS") {
            match v.parse() {
                Ok(b) => self.audit.overwrite_historical = b,
                Err(_) => warn_invalid("PALISADE_OVERWRITE_AUDITS", &v),
            }
        }
        if let Some(v) = env("PALISADE_SUMMARY_ENABLED") {
            match v.parse() {
                Ok(b) => self.audit.summary_enabled = b,
                Err(_) => warn_invalid("PALISADE_SUMMARY_ENABLED", &v),
            }
        }

        // Cluster.
        if let Some(v) = env("PALISADE_API_URL") {
            self.cluster.api_url = v;
        }
        if let Some(v) = env("PALISADE_BEARER_TOKEN") {
            self.cluster.bearer_token = Some(v);
        }
        if let Some(v) = env("PALISADE_NAMESPACE") {
            self.cluster.namespace = v;
        }

        // Engine.
        if let Some(v) = env("PALISADE_TAG_EXCLUSIONS") {
            self.engine.tag_exclusions = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        if let Some(v) = env("PALISADE_WAIT_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.engine.wait_timeout_seconds = n,
                Err(_) => warn_invalid("PALISADE_WAIT_TIMEOUT_SECS", &v),
            }
        }
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value, "ignoring invalid env override");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver<'a>(vars: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.get(key).map(|v| (*v).to_owned())
    }

    #[test]
    fn defaults_are_sane() {
        let c = PalisadeConfig::default();
        assert_eq!(c.audit.dir, "audit");
        assert!(c.audit.enabled);
        assert!(!c.audit.overwrite_historical);
        assert!(c.audit.summary_enabled);
        assert_eq!(c.engine.wait_timeout_seconds, 60);
        assert!(c.engine.tag_exclusions.is_empty());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut c = PalisadeConfig::default();
        let vars = HashMap::from([
            ("PALISADE_AUDIT_DIR", "/tmp/audits"),
            ("PALISADE_AUDIT_ENABLED", "false"),
            ("PALISADE_NAMESPACE", "probe-ns"),
            ("PALISADE_TAG_EXCLUSIONS", "pod_security, iam ,"),
            ("PALISADE_WAIT_TIMEOUT_SECS", "15"),
        ]);
        c.apply_overrides(resolver(&vars));
        assert_eq!(c.audit.dir, "/tmp/audits");
        assert!(!c.audit.enabled);
        assert_eq!(c.cluster.namespace, "probe-ns");
        assert_eq!(c.engine.tag_exclusions, vec!["pod_security", "iam"]);
        assert_eq!(c.engine.wait_timeout_seconds, 15);
    }

    #[test]
    fn invalid_override_is_ignored() {
        let mut c = PalisadeConfig::default();
        let vars = HashMap::from([("PALISADE_WAIT_TIMEOUT_SECS", "not-a-number")]);
        c.apply_overrides(resolver(&vars));
        assert_eq!(c.engine.wait_timeout_seconds, 60);
    }

    #[test]
    fn config_path_prefers_env() {
        let vars = HashMap::from([("PALISADE_CONFIG_PATH", "/etc/palisade/config.toml")]);
        let path = PalisadeConfig::config_path_with(resolver(&vars));
        assert_eq!(path, PathBuf::from("/etc/palisade/config.toml"));

        let empty = HashMap::new();
        let path = PalisadeConfig::config_path_with(resolver(&empty));
        assert_eq!(path, PathBuf::from("palisade.toml"));
    }

    #[test]
    fn toml_sections_parse() {
        let raw = r#"
            [audit]
            dir = "results"
            overwrite_historical = true

            [cluster]
            api_url = "https://cluster.example:6443"
            namespace = "compliance"

            [engine]
            tag_exclusions = ["iam"]
        "#;
        let c: PalisadeConfig = toml::from_str(raw).expect("should parse");
        assert_eq!(c.audit.dir, "results");
        assert!(c.audit.overwrite_historical);
        // Unset fields fall back to defaults.
        assert!(c.audit.enabled);
        assert_eq!(c.cluster.api_url, "https://cluster.example:6443");
        assert_eq!(c.engine.tag_exclusions, vec!["iam"]);
    }
}
