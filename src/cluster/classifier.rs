//! Classification of opaque platform errors onto a canonical taxonomy of
//! security-policy violations.
//!
//! Providers report policy denials as free-form message text; there is no
//! structured field to read the denial reason from. The mapping is therefore
//! substring containment against a rule table. The table is data, not
//! control flow: it can be extended or replaced (e.g. deserialized from
//! configuration) without touching the controller.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform-agnostic reason for a pod-creation failure.
///
/// A single failure may carry several reasons when the message matches more
/// than one rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PodCreationErrorReason {
    /// Privileged containers are not allowed.
    PspNoPrivilege,
    /// Privilege escalation is not allowed.
    PspNoPrivilegeEscalation,
    /// The requested user or group is not allowed.
    PspAllowedUsersGroups,
    /// The container image is not on the allowed list.
    PspContainerAllowedImages,
    /// Host PID/IPC namespace sharing is not allowed.
    PspHostNamespace,
    /// Host networking is not allowed.
    PspHostNetwork,
    /// A requested Linux capability is not allowed.
    PspAllowedCapabilities,
    /// A requested host port is outside the allowed range.
    PspAllowedPortRange,
    /// A requested volume type is not allowed.
    PspAllowedVolumeTypes,
    /// The seccomp profile is not allowed.
    PspSeccompProfile,
    /// The container image could not be pulled.
    ImagePullError,
    /// Admission was blocked outright.
    Blocked,
    /// The request was not authorized.
    Unauthorized,
}

impl fmt::Display for PodCreationErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PspNoPrivilege => "podcreation-error: psp-container-no-privilege",
            Self::PspNoPrivilegeEscalation => {
                "podcreation-error: psp-container-no-privilege-escalation"
            }
            Self::PspAllowedUsersGroups => "podcreation-error: psp-allowed-users-groups",
            Self::PspContainerAllowedImages => "podcreation-error: psp-container-allowed-images",
            Self::PspHostNamespace => "podcreation-error: psp-host-namespace",
            Self::PspHostNetwork => "podcreation-error: psp-host-network",
            Self::PspAllowedCapabilities => "podcreation-error: psp-allowed-capabilities",
            Self::PspAllowedPortRange => "podcreation-error: psp-allowed-portrange",
            Self::PspAllowedVolumeTypes => "podcreation-error: psp-allowed-volume-types-profile",
            Self::PspSeccompProfile => "podcreation-error: psp-allowed-seccomp-profile",
            Self::ImagePullError => "podcreation-error: image-pull-error",
            Self::Blocked => "podcreation-error: blocked",
            Self::Unauthorized => "podcreation-error: unauthorized",
        };
        f.write_str(s)
    }
}

/// One substring-to-reason rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Substring searched for in the platform message.
    pub pattern: String,
    /// Reason contributed when the pattern matches.
    pub reason: PodCreationErrorReason,
}

/// Rule table mapping provider message substrings and container waiting
/// reasons to canonical reasons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonTable {
    /// Substring rules applied to creation-failure message text.
    rules: Vec<ClassificationRule>,
    /// Exact-match rules applied to container waiting-state reasons; a
    /// match is terminal and aborts any phase wait.
    terminal_waiting: Vec<ClassificationRule>,
}

impl Default for ReasonTable {
    /// The built-in table.
    ///
    /// The message strings are provider-specific: `azurepolicy-*` entries
    /// come from AKS via Azure Policy constraints, `securityContext.*`
    /// entries from EKS via the underlying pod security policy. There is no
    /// structured alternative to interpreting these strings.
    fn default() -> Self {
        use PodCreationErrorReason::*;
        let rule = |pattern: &str, reason| ClassificationRule {
            pattern: pattern.to_owned(),
            reason,
        };
        Self {
            rules: vec![
                rule("azurepolicy-container-no-privilege", PspNoPrivilege),
                rule("securityContext.privileged: Invalid value: true", PspNoPrivilege),
                rule(
                    "azurepolicy-psp-container-no-privilege-escalation",
                    PspNoPrivilegeEscalation,
                ),
                rule(
                    "securityContext.allowPrivilegeEscalation: Invalid value: true",
                    PspNoPrivilegeEscalation,
                ),
                rule("azurepolicy-psp-allowed-users-groups", PspAllowedUsersGroups),
                rule("securityContext.runAsUser: Invalid value: 0", PspAllowedUsersGroups),
                rule("azurepolicy-container-allowed-images", PspContainerAllowedImages),
                rule("azurepolicy-psp-host-namespace", PspHostNamespace),
                rule("securityContext.hostPID: Invalid value: true", PspHostNamespace),
                rule("securityContext.hostIPC: Invalid value: true", PspHostNamespace),
                rule("azurepolicy-psp-host-network", PspHostNetwork),
                rule("securityContext.hostNetwork: Invalid value: true", PspHostNetwork),
                rule(
                    "azurepolicy-container-allowed-capabilities",
                    PspAllowedCapabilities,
                ),
                rule(
                    "securityContext.capabilities.add: Invalid value: \"NET_RAW\"",
                    PspAllowedCapabilities,
                ),
                rule(
                    "securityContext.capabilities.add: Invalid value: \"NET_ADMIN\"",
                    PspAllowedCapabilities,
                ),
                rule("azurepolicy-psp-host-network-ports", PspAllowedPortRange),
                rule("hostPort: Invalid value", PspAllowedPortRange),
                rule("azurepolicy-psp-volume-types", PspAllowedVolumeTypes),
                rule("azurepolicy-psp-seccomp", PspSeccompProfile),
                rule("not an allowed seccomp profile", PspSeccompProfile),
            ],
            terminal_waiting: vec![
                rule("ErrImagePull", ImagePullError),
                rule("Blocked", Blocked),
            ],
        }
    }
}

impl ReasonTable {
    /// Build a table from explicit rule sets (e.g. loaded from
    /// configuration).
    pub fn from_rules(
        rules: Vec<ClassificationRule>,
        terminal_waiting: Vec<ClassificationRule>,
    ) -> Self {
        Self {
            rules,
            terminal_waiting,
        }
    }

    /// Classify a platform message: every rule whose pattern the message
    /// contains contributes its reason. An empty result means the error is
    /// unclassified; callers must not assume classification succeeds.
    pub fn classify(&self, message: &str) -> BTreeSet<PodCreationErrorReason> {
        self.rules
            .iter()
            .filter(|rule| message.contains(&rule.pattern))
            .map(|rule| rule.reason)
            .collect()
    }

    /// Look up a container waiting-state reason. A hit means the wait will
    /// never resolve on its own and should be aborted.
    pub fn terminal_waiting(&self, waiting_reason: &str) -> Option<PodCreationErrorReason> {
        self.terminal_waiting
            .iter()
            .find(|rule| rule.pattern == waiting_reason)
            .map(|rule| rule.reason)
    }
}

/// A pod-creation failure with its canonical reason set.
///
/// `reasons` may be empty when no rule matched: the error is then
/// unclassified and should fail the calling scenario loudly rather than be
/// treated as an expected policy denial.
#[derive(Debug, Clone)]
pub struct PodCreationError {
    /// The underlying platform message.
    pub message: String,
    /// Canonical reasons, all matches retained.
    pub reasons: BTreeSet<PodCreationErrorReason>,
}

impl PodCreationError {
    /// True when at least one rule matched.
    pub fn classified(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// True when `reason` is in the reason set.
    pub fn has_reason(&self, reason: PodCreationErrorReason) -> bool {
        self.reasons.contains(&reason)
    }
}

impl fmt::Display for PodCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pod creation error [")?;
        for (i, reason) in self.reasons.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{reason}")?;
        }
        write!(f, "]: {}", self.message)
    }
}

impl std::error::Error for PodCreationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_substring() {
        let table = ReasonTable::default();
        let reasons =
            table.classify("admission denied: securityContext.privileged: Invalid value: true");
        assert!(reasons.contains(&PodCreationErrorReason::PspNoPrivilege));
        assert_eq!(reasons.len(), 1);
    }

    #[test]
    fn retains_all_matches_for_multi_field_violations() {
        let table = ReasonTable::default();
        let message = "spec rejected: securityContext.hostPID: Invalid value: true, \
                       securityContext.hostNetwork: Invalid value: true";
        let reasons = table.classify(message);
        assert!(reasons.contains(&PodCreationErrorReason::PspHostNamespace));
        assert!(reasons.contains(&PodCreationErrorReason::PspHostNetwork));
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn unknown_message_is_unclassified() {
        let table = ReasonTable::default();
        let reasons = table.classify("the kubelet had a bad day");
        assert!(reasons.is_empty());
        let err = PodCreationError {
            message: "the kubelet had a bad day".to_owned(),
            reasons,
        };
        assert!(!err.classified());
    }

    #[test]
    fn terminal_waiting_is_exact_match() {
        let table = ReasonTable::default();
        assert_eq!(
            table.terminal_waiting("ErrImagePull"),
            Some(PodCreationErrorReason::ImagePullError)
        );
        assert_eq!(
            table.terminal_waiting("Blocked"),
            Some(PodCreationErrorReason::Blocked)
        );
        assert_eq!(table.terminal_waiting("ContainerCreating"), None);
    }

    #[test]
    fn reason_strings_are_stable() {
        assert_eq!(
            PodCreationErrorReason::PspNoPrivilege.to_string(),
            "podcreation-error: psp-container-no-privilege"
        );
        assert_eq!(
            PodCreationErrorReason::ImagePullError.to_string(),
            "podcreation-error: image-pull-error"
        );
    }

    #[test]
    fn custom_tables_are_data_driven() {
        let table = ReasonTable::from_rules(
            vec![ClassificationRule {
                pattern: "custom-gatekeeper-denial".to_owned(),
                reason: PodCreationErrorReason::Blocked,
            }],
            Vec::new(),
        );
        assert!(table
            .classify("denied by custom-gatekeeper-denial policy")
            .contains(&PodCreationErrorReason::Blocked));
        // The built-in strings are gone: the table is whatever was loaded.
        assert!(table
            .classify("securityContext.privileged: Invalid value: true")
            .is_empty());
    }
}
