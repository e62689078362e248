//! Retention policy types.
//!
//! Policies are owned by the compliance administrator and read from
//! `policies.json`. A policy version is immutable once any schedule pins
//! it; changes are published as a new version with the old one
//! deactivated.

use crate::span::RetentionSpan;
use rl_common::PolicyId;
use serde::{Deserialize, Serialize};

/// A retention rule for one data category, at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Data category this policy governs (e.g. `medical_records`).
    pub category: String,

    #[serde(default = "default_version")]
    pub version: u32,

    /// Only active policies are used for new schedules.
    #[serde(default = "default_true")]
    pub active: bool,

    /// How long records are kept after their last activity.
    pub retention_period: RetentionSpan,

    /// Lead time before retention expiry at which a warning goes out.
    #[serde(default)]
    pub warning_period: RetentionSpan,

    /// Extra time after retention expiry before the terminal action.
    #[serde(default)]
    pub grace_period: RetentionSpan,

    #[serde(default)]
    pub auto_delete_enabled: bool,

    #[serde(default)]
    pub anonymize_instead_of_delete: bool,

    #[serde(default)]
    pub require_manual_approval: bool,

    /// Exempt records may not be placed under legal hold.
    #[serde(default)]
    pub legal_hold_exempt: bool,

    /// Statute or regulation the period is derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl RetentionPolicy {
    /// Minimal active policy for a category; everything else defaulted.
    pub fn new(category: &str, retention_period: RetentionSpan) -> Self {
        Self {
            category: category.to_string(),
            version: 1,
            active: true,
            retention_period,
            warning_period: RetentionSpan::ZERO,
            grace_period: RetentionSpan::ZERO,
            auto_delete_enabled: false,
            anonymize_instead_of_delete: false,
            require_manual_approval: false,
            legal_hold_exempt: false,
            legal_basis: None,
            description: None,
        }
    }

    pub fn id(&self) -> PolicyId {
        PolicyId::new(&self.category, self.version)
    }

    /// The terminal status this policy leads to.
    pub fn terminal_action(&self) -> TerminalAction {
        if self.anonymize_instead_of_delete {
            TerminalAction::Anonymize
        } else {
            TerminalAction::Delete
        }
    }
}

/// What happens to a record at the end of its retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
    Delete,
    Anonymize,
}

/// On-disk shape of `policies.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFile {
    pub schema_version: String,

    #[serde(default)]
    pub policies: Vec<RetentionPolicy>,
}

impl Default for PolicyFile {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            policies: Vec::new(),
        }
    }
}

impl PolicyFile {
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy_file() {
        let json = r#"{
            "schema_version": "1.0.0",
            "policies": [
                {
                    "category": "medical_records",
                    "version": 2,
                    "retention_period": "20y",
                    "warning_period": "180d",
                    "grace_period": "90d",
                    "auto_delete_enabled": true,
                    "anonymize_instead_of_delete": true,
                    "legal_basis": "CFM 1.821/2007"
                }
            ]
        }"#;
        let file = PolicyFile::from_json(json).unwrap();
        let policy = &file.policies[0];
        assert_eq!(policy.id().as_str(), "medical_records@v2");
        assert!(policy.active);
        assert!(!policy.require_manual_approval);
        assert_eq!(policy.retention_period, RetentionSpan::years(20));
        assert_eq!(policy.terminal_action(), TerminalAction::Anonymize);
    }

    #[test]
    fn test_defaults_for_optional_fields() {
        let json = r#"{"category": "staff", "retention_period": "5y"}"#;
        let policy: RetentionPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.version, 1);
        assert!(policy.warning_period.is_zero());
        assert!(policy.grace_period.is_zero());
        assert!(!policy.auto_delete_enabled);
        assert_eq!(policy.terminal_action(), TerminalAction::Delete);
    }

    #[test]
    fn test_rejects_bad_span() {
        let json = r#"{"category": "staff", "retention_period": "five years"}"#;
        assert!(serde_json::from_str::<RetentionPolicy>(json).is_err());
    }
}
