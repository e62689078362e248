//! Configuration validation errors and semantic validation.
//!
//! Everything here runs at load time. A configuration that passes is safe
//! to hand to the engine; the engine does not re-check it per schedule.

use crate::policy::PolicyFile;
use crate::settings::EngineSettings;
use rl_common::EntityType;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Upper bound for hook and dispatch timeouts.
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Multiple active policies for category {category}: {versions:?}")]
    MultipleActive { category: String, versions: Vec<u32> },

    #[error("Duplicate policy id {0}")]
    DuplicatePolicy(String),
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
            ValidationError::MultipleActive { .. } => 67,
            ValidationError::DuplicatePolicy(_) => 68,
        }
    }
}

fn check_schema_version(actual: &str) -> ValidationResult<()> {
    if actual != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Validate a policy file semantically.
pub fn validate_policies(file: &PolicyFile) -> ValidationResult<()> {
    check_schema_version(&file.schema_version)?;

    let mut seen = BTreeSet::new();
    let mut active: BTreeMap<&str, Vec<u32>> = BTreeMap::new();

    for (idx, policy) in file.policies.iter().enumerate() {
        let field = |name: &str| format!("policies[{}].{}", idx, name);

        // Categories become part of the policy id and of storage keys.
        if EntityType::parse(&policy.category).is_none() {
            return Err(ValidationError::InvalidValue {
                field: field("category"),
                message: format!(
                    "must be 1-64 lowercase letters, digits, '_' or '-', got {:?}",
                    policy.category
                ),
            });
        }

        if policy.version == 0 {
            return Err(ValidationError::InvalidValue {
                field: field("version"),
                message: "must be >= 1".to_string(),
            });
        }

        if policy.retention_period.is_zero() {
            return Err(ValidationError::InvalidValue {
                field: field("retention_period"),
                message: "must be greater than zero".to_string(),
            });
        }

        let id = policy.id();
        if !seen.insert(id.clone()) {
            return Err(ValidationError::DuplicatePolicy(id.to_string()));
        }

        if policy.active {
            active
                .entry(policy.category.as_str())
                .or_default()
                .push(policy.version);
        }
    }

    if let Some((category, versions)) = active.into_iter().find(|(_, v)| v.len() > 1) {
        return Err(ValidationError::MultipleActive {
            category: category.to_string(),
            versions,
        });
    }

    Ok(())
}

/// Validate engine settings semantically.
pub fn validate_settings(settings: &EngineSettings) -> ValidationResult<()> {
    check_schema_version(&settings.schema_version)?;

    if settings.executor_identity.trim().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "executor_identity".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    for (name, value) in [
        ("hook_timeout_secs", settings.hook_timeout_secs),
        ("warning_timeout_secs", settings.warning_timeout_secs),
    ] {
        if value == 0 || value > MAX_TIMEOUT_SECS {
            return Err(ValidationError::InvalidValue {
                field: name.to_string(),
                message: format!("must be in [1, {}], got {}", MAX_TIMEOUT_SECS, value),
            });
        }
    }

    // A claim must outlive the hook call it protects.
    if settings.claim_ttl_secs <= settings.hook_timeout_secs {
        return Err(ValidationError::InvalidValue {
            field: "claim_ttl_secs".to_string(),
            message: format!(
                "must exceed hook_timeout_secs ({}), got {}",
                settings.hook_timeout_secs, settings.claim_ttl_secs
            ),
        });
    }

    if let Some(key) = &settings.anonymization_key {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| ValidationError::InvalidValue {
                field: "anonymization_key".to_string(),
                message: format!("invalid base64: {}", e),
            })?;
        if decoded.len() != 32 {
            return Err(ValidationError::InvalidValue {
                field: "anonymization_key".to_string(),
                message: format!("key must be 32 bytes, got {}", decoded.len()),
            });
        }
    }

    for (entity_type, cfg) in &settings.entity_types {
        if EntityType::parse(entity_type).is_none() {
            return Err(ValidationError::InvalidValue {
                field: format!("entity_types.{}", entity_type),
                message: "not a valid entity type name".to_string(),
            });
        }
        if let Some(both) = cfg
            .identifying_fields
            .iter()
            .find(|f| cfg.preserved_fields.contains(*f))
        {
            return Err(ValidationError::SemanticError(format!(
                "entity_types.{}: field {:?} is both identifying and preserved",
                entity_type, both
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RetentionPolicy;
    use crate::settings::EntityTypeSettings;
    use crate::span::RetentionSpan;

    fn file(policies: Vec<RetentionPolicy>) -> PolicyFile {
        PolicyFile {
            policies,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_versions() {
        let mut v1 = RetentionPolicy::new("medical_records", RetentionSpan::years(20));
        v1.active = false;
        let mut v2 = v1.clone();
        v2.version = 2;
        v2.active = true;
        assert!(validate_policies(&file(vec![v1, v2])).is_ok());
    }

    #[test]
    fn test_multiple_active_is_config_error() {
        let v1 = RetentionPolicy::new("medical_records", RetentionSpan::years(20));
        let mut v2 = v1.clone();
        v2.version = 2;
        let err = validate_policies(&file(vec![v1, v2])).unwrap_err();
        match err {
            ValidationError::MultipleActive { category, versions } => {
                assert_eq!(category, "medical_records");
                assert_eq!(versions, vec![1, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_id() {
        let mut a = RetentionPolicy::new("staff", RetentionSpan::years(5));
        a.active = false;
        let b = RetentionPolicy::new("staff", RetentionSpan::years(6));
        assert!(matches!(
            validate_policies(&file(vec![a, b])),
            Err(ValidationError::DuplicatePolicy(id)) if id == "staff@v1"
        ));
    }

    #[test]
    fn test_bad_category_and_zero_retention() {
        let bad = RetentionPolicy::new("Medical Records", RetentionSpan::years(1));
        assert!(validate_policies(&file(vec![bad])).is_err());
        let zero = RetentionPolicy::new("staff", RetentionSpan::ZERO);
        assert!(validate_policies(&file(vec![zero])).is_err());
    }

    #[test]
    fn test_schema_version_checked() {
        let mut f = file(vec![]);
        f.schema_version = "0.9.0".to_string();
        assert!(matches!(
            validate_policies(&f),
            Err(ValidationError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_settings_defaults_are_valid() {
        assert!(validate_settings(&EngineSettings::default()).is_ok());
    }

    #[test]
    fn test_settings_rejections() {
        let mut s = EngineSettings {
            hook_timeout_secs: 0,
            ..Default::default()
        };
        assert!(validate_settings(&s).is_err());

        s.hook_timeout_secs = 60;
        s.claim_ttl_secs = 60;
        assert!(validate_settings(&s).is_err());

        s.claim_ttl_secs = 600;
        s.anonymization_key = Some("not base64!".to_string());
        assert!(validate_settings(&s).is_err());

        s.anonymization_key = Some("AAAA".to_string());
        assert!(validate_settings(&s).is_err());

        s.anonymization_key = None;
        s.entity_types.insert(
            "patient".to_string(),
            EntityTypeSettings {
                identifying_fields: vec!["name".into()],
                preserved_fields: vec!["name".into()],
                ..Default::default()
            },
        );
        assert!(matches!(
            validate_settings(&s),
            Err(ValidationError::SemanticError(_))
        ));
    }
}
