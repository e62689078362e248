//! Retention lifecycle common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the engine crates:
//! - Tagged entity references (never language-level references)
//! - Schedule, policy and run identifiers
//! - The unified error taxonomy with stable codes
//! - Output format specifications

pub mod error;
pub mod id;
pub mod output;

pub use error::{Error, ErrorCategory, Result, SuggestedAction};
pub use id::{EntityId, EntityRef, EntityType, PolicyId, RunId, ScheduleId, ShardSpec};
pub use output::OutputFormat;

/// Schema version for persisted schedule documents and CLI payloads.
pub const SCHEMA_VERSION: &str = "1.0.0";
