//! Deletion executor: bounded calls into collaborator hooks.
//!
//! The executor never touches entity data itself. It resolves the hooks
//! for the entity type, captures the pre-action evidence, and runs the
//! terminal action on a worker thread with a deadline.

mod file_entities;
mod hooks;

pub use file_entities::FileEntityStore;
pub use hooks::{EntityHooks, HookError, HookRegistry};

use crate::bounded::{call_bounded, millis, Bounded};
use rl_common::{EntityRef, EntityType};
use rl_config::DeleteMode;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Executor failures. All of them are scoped to one schedule.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no hooks registered for entity type {0}")]
    NoHooks(EntityType),

    #[error("hook failed for {entity}: {source}")]
    Hook {
        entity: EntityRef,
        #[source]
        source: HookError,
    },

    #[error("hook for {entity} timed out after {millis}ms")]
    Timeout { entity: EntityRef, millis: u64 },

    #[error("hook worker for {0} exited without a result")]
    WorkerLost(EntityRef),
}

impl From<ExecutorError> for rl_common::Error {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Timeout { entity, millis } => rl_common::Error::HookTimeout {
                entity: entity.to_string(),
                millis,
            },
            ExecutorError::NoHooks(entity_type) => rl_common::Error::ExecutionFailure {
                entity: entity_type.to_string(),
                reason: "no hooks registered".to_string(),
            },
            ExecutorError::Hook { entity, source } => rl_common::Error::ExecutionFailure {
                entity: entity.to_string(),
                reason: source.to_string(),
            },
            ExecutorError::WorkerLost(entity) => rl_common::Error::ExecutionFailure {
                entity: entity.to_string(),
                reason: "hook worker exited without a result".to_string(),
            },
        }
    }
}

/// State of an entity immediately before its terminal action.
#[derive(Debug, Clone)]
pub struct PreActionEvidence {
    pub snapshot: Value,
    /// Canonical JSON form of `snapshot`; this is what gets hashed and logged.
    pub entity_snapshot: String,
    /// SHA-256 (hex) of `entity_snapshot`.
    pub verification_hash: String,
}

impl PreActionEvidence {
    pub fn from_snapshot(snapshot: Value) -> Self {
        let entity_snapshot = canonical_json(&snapshot);
        let verification_hash = hex::encode(Sha256::digest(entity_snapshot.as_bytes()));
        Self {
            snapshot,
            entity_snapshot,
            verification_hash,
        }
    }
}

/// Runs collaborator hooks under a deadline.
#[derive(Debug, Clone)]
pub struct DeletionExecutor {
    hooks: HookRegistry,
    timeout: Duration,
}

impl DeletionExecutor {
    pub fn new(hooks: HookRegistry, timeout: Duration) -> Self {
        Self { hooks, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Snapshot the entity and hash it.
    pub fn capture(&self, entity: &EntityRef) -> Result<PreActionEvidence, ExecutorError> {
        let snapshot = self.bounded(entity, "snapshot", |hooks, entity| hooks.snapshot(&entity))?;
        Ok(PreActionEvidence::from_snapshot(snapshot))
    }

    /// Delete through the owning collaborator.
    pub fn delete(
        &self,
        entity: &EntityRef,
        mode: DeleteMode,
        verification_hash: &str,
    ) -> Result<(), ExecutorError> {
        tracing::debug!(
            entity = %entity,
            mode = %mode,
            verification_hash,
            "invoking delete hook"
        );
        self.bounded(entity, "delete", move |hooks, entity| hooks.delete(&entity, mode))
    }

    /// Anonymize through the owning collaborator; returns the canonical
    /// anonymized representation.
    pub fn anonymize(
        &self,
        entity: &EntityRef,
        verification_hash: &str,
    ) -> Result<String, ExecutorError> {
        tracing::debug!(entity = %entity, verification_hash, "invoking anonymize hook");
        let value = self.bounded(entity, "anonymize", |hooks, entity| hooks.anonymize(&entity))?;
        Ok(canonical_json(&value))
    }

    fn bounded<T, F>(&self, entity: &EntityRef, op: &str, f: F) -> Result<T, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn EntityHooks>, EntityRef) -> Result<T, HookError> + Send + 'static,
    {
        let hooks = self
            .hooks
            .resolve(&entity.entity_type)
            .ok_or_else(|| ExecutorError::NoHooks(entity.entity_type.clone()))?;
        let owned = entity.clone();
        match call_bounded(op, self.timeout, move || f(hooks, owned)) {
            Bounded::Done(value) => Ok(value),
            Bounded::Failed(source) => Err(ExecutorError::Hook {
                entity: entity.clone(),
                source,
            }),
            Bounded::Timeout => Err(ExecutorError::Timeout {
                entity: entity.clone(),
                millis: millis(self.timeout),
            }),
            Bounded::Lost => Err(ExecutorError::WorkerLost(entity.clone())),
        }
    }
}

/// Serialize with object keys sorted at every depth and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key.as_str()) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
