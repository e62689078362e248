//! Keyed placeholders for anonymized values.
//!
//! Uses HMAC-SHA256 with truncated output. Placeholders are stable for a
//! given key so linkage across records survives anonymization, and they
//! cannot be reversed or brute-forced without the key.

use crate::error::{RedactionError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::Path;

/// Number of bytes kept from the HMAC output (16 hex chars).
pub const PLACEHOLDER_BYTES: usize = 8;

/// Key material for HMAC-SHA256.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; 32],
    /// Key identifier embedded in every placeholder.
    pub key_id: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    /// Create new key material with a random key.
    pub fn generate(key_id: &str) -> Result<Self> {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).map_err(|e| {
            RedactionError::Key(format!("failed to generate random key: {}", e))
        })?;
        Ok(Self {
            key,
            key_id: key_id.to_string(),
        })
    }

    /// Create key material from raw bytes.
    pub fn from_bytes(key: [u8; 32], key_id: &str) -> Self {
        Self {
            key,
            key_id: key_id.to_string(),
        }
    }

    /// Create key material from a base64-encoded 32 byte key.
    pub fn from_base64(encoded: &str, key_id: &str) -> Result<Self> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| RedactionError::Key(format!("invalid base64: {}", e)))?;

        let key: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            RedactionError::Key(format!("key must be 32 bytes, got {}", decoded.len()))
        })?;
        Ok(Self::from_bytes(key, key_id))
    }

    /// Export key material as base64.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.key)
    }

    /// Placeholder for `value`: `[ANON:<key_id>:<16 hex>]`.
    pub fn placeholder(&self, value: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
            .map_err(|_| RedactionError::Mac)?;
        mac.update(value.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(format!(
            "[ANON:{}:{}]",
            self.key_id,
            hex::encode(&digest[..PLACEHOLDER_BYTES])
        ))
    }
}

/// On-disk key file, created once per installation.
#[derive(Serialize, Deserialize)]
pub struct KeyFile {
    pub schema_version: String,
    pub key_id: String,
    pub created_at: String,
    pub algorithm: String,
    /// Base64-encoded key material.
    pub key_material: String,
}

impl KeyFile {
    /// Load the key at `path`, creating it with a fresh random key if the
    /// file does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<KeyMaterial> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let file: KeyFile = serde_json::from_str(&content)?;
            return KeyMaterial::from_base64(&file.key_material, &file.key_id);
        }

        let key = KeyMaterial::generate("k1")?;
        let file = KeyFile {
            schema_version: "1.0.0".to_string(),
            key_id: key.key_id.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            algorithm: "hmac-sha256".to_string(),
            key_material: key.to_base64(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        file.save(path)?;
        Ok(key)
    }

    /// Save with restricted permissions.
    ///
    /// On Unix the file is created with 0600 so it is never readable by
    /// others, even briefly.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&path, &content)?;
        }

        Ok(())
    }
}
