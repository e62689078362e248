//! Reference collaborator: entities kept as JSON documents on disk.
//!
//! `<data_dir>/entities/<type>/<id>.json`. Used by the CLI and by tests
//! in place of a domain module's own persistence. Soft delete stamps
//! `_deleted_at`; hard delete removes the file; anonymize rewrites the
//! document through `rl-redact` and stamps `_anonymized_at`.

use super::hooks::{EntityHooks, HookError};
use crate::fsutil::write_atomic;
use chrono::Utc;
use rl_common::EntityRef;
use rl_config::{DeleteMode, EngineSettings};
use rl_redact::{AnonymizationRules, Anonymizer, KeyFile, KeyMaterial};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const DELETED_AT: &str = "_deleted_at";
const ANONYMIZED_AT: &str = "_anonymized_at";

pub struct FileEntityStore {
    root: PathBuf,
    key: KeyMaterial,
    settings: EngineSettings,
}

impl std::fmt::Debug for FileEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEntityStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FileEntityStore {
    /// Open the store under `<data_dir>/entities`.
    ///
    /// The placeholder key comes from `settings.anonymization_key` or, when
    /// unset, from `<data_dir>/keys/anonymization.json` (created on first use).
    pub fn open(data_dir: &Path, settings: &EngineSettings) -> Result<Self, HookError> {
        let key = match &settings.anonymization_key {
            Some(encoded) => KeyMaterial::from_base64(encoded, "configured")
                .map_err(|e| HookError::Failed(e.to_string()))?,
            None => KeyFile::load_or_create(data_dir.join("keys").join("anonymization.json"))
                .map_err(|e| HookError::Failed(e.to_string()))?,
        };
        Ok(Self {
            root: data_dir.join("entities"),
            key,
            settings: settings.clone(),
        })
    }

    fn path(&self, entity: &EntityRef) -> PathBuf {
        // Ids are opaque; anything outside a safe charset is hashed so it
        // can never escape the type directory.
        let id = entity.entity_id.as_str();
        let safe = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let file = if safe {
            format!("{}.json", id)
        } else {
            format!("h-{}.json", hex::encode(Sha256::digest(id.as_bytes())))
        };
        self.root.join(entity.entity_type.as_str()).join(file)
    }

    /// Create or replace an entity document.
    pub fn put(&self, entity: &EntityRef, document: &Value) -> Result<(), HookError> {
        if !document.is_object() {
            return Err(HookError::Failed(
                "entity document must be a JSON object".to_string(),
            ));
        }
        let content = serde_json::to_vec_pretty(document)?;
        write_atomic(&self.path(entity), &content)?;
        Ok(())
    }

    /// Read an entity document, including soft-deleted ones.
    pub fn get(&self, entity: &EntityRef) -> Result<Option<Value>, HookError> {
        match std::fs::read(self.path(entity)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load(&self, entity: &EntityRef) -> Result<Value, HookError> {
        self.get(entity)?
            .ok_or_else(|| HookError::NotFound(entity.clone()))
    }

    fn stamp(document: &mut Value, field: &str) {
        if let Value::Object(map) = document {
            map.insert(field.to_string(), Value::String(Utc::now().to_rfc3339()));
        }
    }
}

impl EntityHooks for FileEntityStore {
    fn snapshot(&self, entity: &EntityRef) -> Result<Value, HookError> {
        self.load(entity)
    }

    fn delete(&self, entity: &EntityRef, mode: DeleteMode) -> Result<(), HookError> {
        let path = self.path(entity);
        match mode {
            DeleteMode::Hard => match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(HookError::NotFound(entity.clone())),
                Err(e) => Err(e.into()),
            },
            DeleteMode::Soft => {
                let mut document = self.load(entity)?;
                Self::stamp(&mut document, DELETED_AT);
                write_atomic(&path, &serde_json::to_vec_pretty(&document)?)?;
                Ok(())
            }
        }
    }

    fn anonymize(&self, entity: &EntityRef) -> Result<Value, HookError> {
        let document = self.load(entity)?;
        let type_settings = self.settings.entity_type(entity.entity_type.as_str());
        let rules = AnonymizationRules::new(
            type_settings.identifying_fields,
            type_settings.preserved_fields,
        );
        let anonymizer = Anonymizer::new(self.key.clone(), rules);
        let mut out = anonymizer
            .anonymize(&document)
            .map_err(|e| HookError::Failed(e.to_string()))?
            .document;
        Self::stamp(&mut out, ANONYMIZED_AT);
        write_atomic(&self.path(entity), &serde_json::to_vec_pretty(&out)?)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(dir: &Path) -> FileEntityStore {
        let mut settings = EngineSettings::default();
        settings.entity_types.insert(
            "patient".to_string(),
            rl_config::EntityTypeSettings {
                identifying_fields: vec!["cpf".to_string()],
                preserved_fields: vec!["diagnosis".to_string()],
                ..Default::default()
            },
        );
        FileEntityStore::open(dir, &settings).unwrap()
    }

    #[test]
    fn test_soft_delete_stamps_document() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let entity: EntityRef = "patient:1".parse().unwrap();
        store.put(&entity, &json!({ "full_name": "Ana Lima" })).unwrap();

        store.delete(&entity, DeleteMode::Soft).unwrap();
        let doc = store.get(&entity).unwrap().unwrap();
        assert!(doc.get(DELETED_AT).is_some());
        assert_eq!(doc["full_name"], "Ana Lima");
    }

    #[test]
    fn test_hard_delete_removes_document() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let entity: EntityRef = "patient:2".parse().unwrap();
        store.put(&entity, &json!({ "full_name": "Ana Lima" })).unwrap();

        store.delete(&entity, DeleteMode::Hard).unwrap();
        assert!(store.get(&entity).unwrap().is_none());
        assert!(matches!(
            store.delete(&entity, DeleteMode::Hard),
            Err(HookError::NotFound(_))
        ));
    }

    #[test]
    fn test_anonymize_rewrites_identifying_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let entity: EntityRef = "patient:3".parse().unwrap();
        store
            .put(
                &entity,
                &json!({
                    "full_name": "Maria Souza",
                    "cpf": "123.456.789-09",
                    "diagnosis": "J45 asthma",
                    "notes": "Maria Souza reported improvement"
                }),
            )
            .unwrap();

        let out = store.anonymize(&entity).unwrap();
        let text = out.to_string();
        assert!(!text.contains("Maria Souza"));
        assert!(!text.contains("123.456.789-09"));
        assert_eq!(out["diagnosis"], "J45 asthma");
        assert!(out.get(ANONYMIZED_AT).is_some());
        assert_eq!(store.get(&entity).unwrap().unwrap(), out);
    }

    #[test]
    fn test_unsafe_ids_stay_inside_root() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let entity: EntityRef = "patient:../../etc/passwd".parse().unwrap();
        let path = store.path(&entity);
        assert!(path.starts_with(tmp.path().join("entities").join("patient")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("h-"));
    }
}
