//! Engine settings (`retention.toml`).
//!
//! One explicit settings struct, loaded once and handed to the engine at
//! construction. Nothing reads settings from a global.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// How the owning collaborator removes a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Mark the record deleted and keep it out of normal reads.
    #[default]
    Soft,
    /// Physically remove the record.
    Hard,
}

impl std::fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteMode::Soft => write!(f, "soft"),
            DeleteMode::Hard => write!(f, "hard"),
        }
    }
}

/// Per entity type settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeSettings {
    #[serde(default)]
    pub delete_mode: DeleteMode,

    /// Fields replaced with placeholders on anonymization, in addition to
    /// the ones recognised by name.
    #[serde(default)]
    pub identifying_fields: Vec<String>,

    /// Fields that are never touched by anonymization.
    #[serde(default)]
    pub preserved_fields: Vec<String>,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub schema_version: String,

    /// Global switch; a policy auto-deletes only when both this and the
    /// policy's own flag are set.
    pub auto_delete_enabled: bool,

    /// Identity recorded as executor in every audit entry.
    pub executor_identity: String,

    /// Bound on each deletion/anonymization/snapshot hook call.
    pub hook_timeout_secs: u64,

    /// Bound on each warning dispatch call.
    pub warning_timeout_secs: u64,

    /// A claim older than this may be taken over by another run.
    pub claim_ttl_secs: u64,

    /// Audit log rotation threshold in bytes (0 disables rotation).
    pub audit_max_bytes: u64,

    /// Overrides the resolved data directory when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Base64 HMAC key for anonymization placeholders. When absent a key
    /// is generated once and kept under the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymization_key: Option<String>,

    pub entity_types: BTreeMap<String, EntityTypeSettings>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            auto_delete_enabled: true,
            executor_identity: "retention-engine".to_string(),
            hook_timeout_secs: 30,
            warning_timeout_secs: 10,
            claim_ttl_secs: 3600,
            audit_max_bytes: 10 * 1024 * 1024,
            data_dir: None,
            anonymization_key: None,
            entity_types: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    pub fn warning_timeout(&self) -> Duration {
        Duration::from_secs(self.warning_timeout_secs)
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        let secs = self.claim_ttl_secs.min((i64::MAX / 1000) as u64) as i64;
        chrono::Duration::seconds(secs)
    }

    /// Settings for an entity type, defaulted when not configured.
    pub fn entity_type(&self, entity_type: &str) -> EntityTypeSettings {
        self.entity_types
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delete_mode_for(&self, entity_type: &str) -> DeleteMode {
        self.entity_types
            .get(entity_type)
            .map(|s| s.delete_mode)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let settings = EngineSettings::from_toml_str("").unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.hook_timeout(), Duration::from_secs(30));
        assert_eq!(settings.delete_mode_for("patient"), DeleteMode::Soft);
    }

    #[test]
    fn test_parse_entity_types() {
        let toml = r#"
            auto_delete_enabled = false
            executor_identity = "nightly-cron"
            hook_timeout_secs = 5

            [entity_types.patient]
            delete_mode = "hard"
            identifying_fields = ["full_name", "cpf"]
            preserved_fields = ["diagnosis"]
        "#;
        let settings = EngineSettings::from_toml_str(toml).unwrap();
        assert!(!settings.auto_delete_enabled);
        assert_eq!(settings.executor_identity, "nightly-cron");
        assert_eq!(settings.warning_timeout_secs, 10);
        assert_eq!(settings.delete_mode_for("patient"), DeleteMode::Hard);
        let patient = settings.entity_type("patient");
        assert_eq!(patient.identifying_fields, vec!["full_name", "cpf"]);
        assert_eq!(patient.preserved_fields, vec!["diagnosis"]);
        assert_eq!(settings.entity_type("staff"), EntityTypeSettings::default());
    }

    #[test]
    fn test_rejects_unknown_delete_mode() {
        let toml = r#"
            [entity_types.patient]
            delete_mode = "shred"
        "#;
        assert!(EngineSettings::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_toml_output_is_loadable() {
        let mut settings = EngineSettings::default();
        settings.entity_types.insert(
            "staff".to_string(),
            EntityTypeSettings {
                delete_mode: DeleteMode::Hard,
                ..Default::default()
            },
        );
        let text = settings.to_toml_string().unwrap();
        assert_eq!(EngineSettings::from_toml_str(&text).unwrap(), settings);
    }
}
