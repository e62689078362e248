//! Configuration loading for the rl-core binary.
//!
//! This module handles:
//! - Loading policies.json and retention.toml from the resolved config dir
//! - Schema version and semantic validation (once, at load time)
//! - Content hashes so a run can say exactly which configuration it used

use rl_config::validate::{validate_policies, validate_settings};
use rl_config::{
    ConfigSource, EngineSettings, PolicyFile, ResolvedPaths, ValidationError,
    CONFIG_SCHEMA_VERSION,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON in {path}: {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("semantic validation failed for {path}: {source}")]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for rl_common::Error {
    fn from(err: ConfigError) -> Self {
        rl_common::Error::Config(err.to_string())
    }
}

/// Loaded configuration with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub policies: PolicyFile,
    /// None when no policies.json exists (empty policy set).
    pub policies_path: Option<PathBuf>,
    pub policies_hash: Option<String>,

    pub settings: EngineSettings,
    /// None when built-in defaults are used.
    pub settings_path: Option<PathBuf>,
    pub settings_hash: Option<String>,

    pub paths: ResolvedPaths,
    /// Where schedules, audit logs and the outbox live.
    pub data_dir: PathBuf,
}

impl ResolvedConfig {
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            config_dir: self.paths.config_dir.clone(),
            config_source: self.paths.config_source.to_string(),
            policies_path: self.policies_path.clone(),
            policies_hash: self.policies_hash.clone(),
            policy_count: self.policies.policies.len(),
            settings_path: self.settings_path.clone(),
            settings_hash: self.settings_hash.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}

/// What a command ran with; included in `policy check` output.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub config_dir: Option<PathBuf>,
    pub config_source: String,
    pub policies_path: Option<PathBuf>,
    pub policies_hash: Option<String>,
    pub policy_count: usize,
    pub settings_path: Option<PathBuf>,
    pub settings_hash: Option<String>,
    pub data_dir: PathBuf,
}

/// Load and validate policies and settings from `paths`.
///
/// A missing file falls back to defaults: no policies, default settings.
/// `data_dir` from retention.toml applies only when neither the CLI nor
/// the environment chose one.
pub fn load_config(paths: &ResolvedPaths) -> Result<ResolvedConfig, ConfigError> {
    let (policies, policies_path, policies_hash) = match existing(paths.policies_path()) {
        Some(path) => {
            let (content, hash) = read(&path)?;
            let file = PolicyFile::from_json(&content).map_err(|source| ConfigError::ParseJson {
                path: path.clone(),
                source,
            })?;
            validate_policies(&file).map_err(|source| ConfigError::Validation {
                path: path.clone(),
                source,
            })?;
            (file, Some(path), Some(hash))
        }
        None => (PolicyFile::default(), None, None),
    };

    let (settings, settings_path, settings_hash) = match existing(paths.settings_path()) {
        Some(path) => {
            let (content, hash) = read(&path)?;
            let settings =
                EngineSettings::from_toml_str(&content).map_err(|source| ConfigError::ParseToml {
                    path: path.clone(),
                    source,
                })?;
            validate_settings(&settings).map_err(|source| ConfigError::Validation {
                path: path.clone(),
                source,
            })?;
            (settings, Some(path), Some(hash))
        }
        None => (EngineSettings::default(), None, None),
    };

    let data_dir = match (&settings.data_dir, paths.data_source) {
        (Some(dir), ConfigSource::Xdg | ConfigSource::BuiltinDefault) => dir.clone(),
        _ => paths.data_dir.clone(),
    };

    tracing::debug!(
        policies = ?policies_path,
        settings = ?settings_path,
        data_dir = %data_dir.display(),
        schema_version = CONFIG_SCHEMA_VERSION,
        "configuration loaded"
    );

    Ok(ResolvedConfig {
        policies,
        policies_path,
        policies_hash,
        settings,
        settings_path,
        settings_hash,
        paths: paths.clone(),
        data_dir,
    })
}

fn existing(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| p.exists())
}

fn read(path: &Path) -> Result<(String, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let hash = hex::encode(Sha256::digest(content.as_bytes()));
    Ok((content, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rl_config::resolve::resolve_paths_with;

    fn paths(config_dir: &Path, data_dir: &Path) -> ResolvedPaths {
        resolve_paths_with(Some(config_dir), Some(data_dir), |_| None)
    }

    const POLICIES: &str = r#"{
        "schema_version": "1.0.0",
        "policies": [
            {
                "category": "medical_records",
                "version": 1,
                "retention_period": "20y",
                "warning_period": "180d",
                "grace_period": "90d",
                "auto_delete_enabled": true
            }
        ]
    }"#;

    #[test]
    fn test_missing_files_use_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(&paths(&tmp.path().join("none"), tmp.path())).unwrap();
        assert!(config.policies.policies.is_empty());
        assert!(config.policies_path.is_none());
        assert_eq!(config.settings, EngineSettings::default());
        assert_eq!(config.data_dir, tmp.path());
    }

    #[test]
    fn test_loads_and_hashes_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("policies.json"), POLICIES).unwrap();
        std::fs::write(
            tmp.path().join("retention.toml"),
            "executor_identity = \"nightly-job\"\n",
        )
        .unwrap();

        let config = load_config(&paths(tmp.path(), tmp.path())).unwrap();
        assert_eq!(config.policies.policies.len(), 1);
        assert_eq!(config.settings.executor_identity, "nightly-job");
        assert_eq!(
            config.policies_hash.as_deref(),
            Some(hex::encode(Sha256::digest(POLICIES.as_bytes())).as_str())
        );
        let snapshot = config.snapshot();
        assert_eq!(snapshot.policy_count, 1);
        assert!(serde_json::to_string(&snapshot).is_ok());
    }

    #[test]
    fn test_two_active_versions_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let doubled = POLICIES.replace(
            "\"auto_delete_enabled\": true\n            }",
            "\"auto_delete_enabled\": true\n            },\n            { \"category\": \"medical_records\", \"version\": 2, \"retention_period\": \"25y\" }",
        );
        std::fs::write(tmp.path().join("policies.json"), doubled).unwrap();

        let err = load_config(&paths(tmp.path(), tmp.path())).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation {
                source: ValidationError::MultipleActive { .. },
                ..
            }
        ));
        assert_eq!(rl_common::Error::from(err).code(), 10);
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("policies.json"), "{ not json").unwrap();
        let err = load_config(&paths(tmp.path(), tmp.path())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_settings_data_dir_applies_without_explicit_choice() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("retention.toml"),
            format!("data_dir = {:?}\n", tmp.path().join("from-settings")),
        )
        .unwrap();

        let explicit = load_config(&paths(tmp.path(), &tmp.path().join("cli"))).unwrap();
        assert_eq!(explicit.data_dir, tmp.path().join("cli"));

        let implicit_paths = resolve_paths_with(Some(tmp.path()), None, |_| None);
        let implicit = load_config(&implicit_paths).unwrap();
        assert_eq!(implicit.data_dir, tmp.path().join("from-settings"));
    }
}
