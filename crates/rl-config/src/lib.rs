//! Retention lifecycle configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for policies.json and retention.toml
//! - Calendar retention spans (`20y`, `180d`, `1y6m15d`)
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation performed once, at load time

pub mod policy;
pub mod resolve;
pub mod settings;
pub mod span;
pub mod validate;

pub use policy::{PolicyFile, RetentionPolicy, TerminalAction};
pub use resolve::{resolve_paths, ConfigSource, ResolvedPaths};
pub use settings::{DeleteMode, EngineSettings, EntityTypeSettings};
pub use span::{RetentionSpan, SpanParseError};
pub use validate::{ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
