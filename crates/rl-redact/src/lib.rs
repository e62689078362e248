//! Deterministic anonymization for retained entity documents.
//!
//! Collaborators call into this crate from their anonymization hooks. The
//! engine replaces identifying fields with keyed placeholders and keeps
//! everything else (clinical notes, amounts, dates of service) intact,
//! except that identifying values quoted inside other text are scrubbed.
//!
//! # Key Features
//!
//! - **Deterministic placeholders**: HMAC-SHA256 under a per-installation
//!   key, so the same value always maps to the same placeholder and
//!   cross-record linkage survives without the value itself.
//! - **Field classification**: field names are classified (name, email,
//!   national id, ...) so common identifiers need no configuration.
//! - **Free-text scrubbing**: identifying values and recognisable contact
//!   data are removed from non-identifying strings.
//! - **Fail-closed**: a string that still contains an identifying value
//!   after scrubbing is replaced as a whole.
//!
//! # Example
//!
//! ```no_run
//! use rl_redact::{Anonymizer, AnonymizationRules, KeyMaterial};
//! use serde_json::json;
//!
//! let key = KeyMaterial::generate("k1").unwrap();
//! let anonymizer = Anonymizer::new(key, AnonymizationRules::default());
//! let out = anonymizer
//!     .anonymize(&json!({"full_name": "Maria Souza", "diagnosis": "J45"}))
//!     .unwrap();
//! assert!(!out.document.to_string().contains("Maria Souza"));
//! ```

pub mod detect;
pub mod engine;
pub mod error;
pub mod field_class;
pub mod hash;

pub use detect::{PiiDetector, PiiKind};
pub use engine::{AnonymizationRules, AnonymizedDocument, Anonymizer};
pub use error::{RedactionError, Result};
pub use field_class::{FieldClass, RiskLevel};
pub use hash::{KeyFile, KeyMaterial};
