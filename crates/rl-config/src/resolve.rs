//! Configuration and data directory resolution.
//!
//! Resolution order: CLI arguments → environment variables → XDG paths → defaults.

use std::path::{Path, PathBuf};

/// Where a directory was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// XDG base directory.
    Xdg,

    /// Nothing found; built-in defaults apply.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::Xdg => write!(f, "XDG directory"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
pub const ENV_CONFIG_DIR: &str = "RL_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "RL_DATA";

/// Standard config file names.
pub const POLICIES_FILENAME: &str = "policies.json";
pub const SETTINGS_FILENAME: &str = "retention.toml";

/// Application name for XDG directories.
pub const APP_NAME: &str = "retention-lifecycle";

/// Resolved directories with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    /// Directory holding policies.json and retention.toml, if any.
    pub config_dir: Option<PathBuf>,
    pub config_source: ConfigSource,

    /// Directory holding schedules, audit logs and outbox.
    pub data_dir: PathBuf,
    pub data_source: ConfigSource,
}

impl ResolvedPaths {
    pub fn policies_path(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|d| d.join(POLICIES_FILENAME))
    }

    pub fn settings_path(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|d| d.join(SETTINGS_FILENAME))
    }
}

/// Resolve config and data directories using the process environment.
pub fn resolve_paths(cli_config_dir: Option<&Path>, cli_data_dir: Option<&Path>) -> ResolvedPaths {
    resolve_paths_with(cli_config_dir, cli_data_dir, |key| std::env::var(key).ok())
}

/// Resolution with an injectable environment lookup.
pub fn resolve_paths_with<F>(
    cli_config_dir: Option<&Path>,
    cli_data_dir: Option<&Path>,
    env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (config_dir, config_source) = resolve_config_dir(cli_config_dir, &env);
    let (data_dir, data_source) = resolve_data_dir(cli_data_dir, &env);
    ResolvedPaths {
        config_dir,
        config_source,
        data_dir,
        data_source,
    }
}

fn resolve_config_dir<F>(cli: Option<&Path>, env: &F) -> (Option<PathBuf>, ConfigSource)
where
    F: Fn(&str) -> Option<String>,
{
    // 1. CLI argument (taken even if missing, so typos surface as errors)
    if let Some(dir) = cli {
        return (Some(dir.to_path_buf()), ConfigSource::CliArgument);
    }

    // 2. Environment variable
    if let Some(dir) = env(ENV_CONFIG_DIR).filter(|s| !s.is_empty()) {
        return (Some(PathBuf::from(dir)), ConfigSource::Environment);
    }

    // 3. XDG config directory, only if it exists
    let xdg = env("XDG_CONFIG_HOME")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir);
    if let Some(base) = xdg {
        let dir = base.join(APP_NAME);
        if dir.is_dir() {
            return (Some(dir), ConfigSource::Xdg);
        }
    }

    // 4. Built-in defaults
    (None, ConfigSource::BuiltinDefault)
}

fn resolve_data_dir<F>(cli: Option<&Path>, env: &F) -> (PathBuf, ConfigSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = cli {
        return (dir.to_path_buf(), ConfigSource::CliArgument);
    }

    if let Some(dir) = env(ENV_DATA_DIR).filter(|s| !s.is_empty()) {
        return (PathBuf::from(dir), ConfigSource::Environment);
    }

    let xdg = env("XDG_DATA_HOME")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::data_dir);
    if let Some(base) = xdg {
        return (base.join(APP_NAME), ConfigSource::Xdg);
    }

    (
        PathBuf::from(".").join(format!(".{}", APP_NAME)),
        ConfigSource::BuiltinDefault,
    )
}
