//! Collaborator hook interface, resolved per entity type.

use rl_common::{EntityRef, EntityType};
use rl_config::DeleteMode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors a collaborator hook may report.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("entity not found: {0}")]
    NotFound(EntityRef),

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Operations the owning domain module exposes for its entities.
///
/// Implementations must be atomic with respect to their own store: a
/// returned error means nothing was changed.
pub trait EntityHooks: Send + Sync {
    /// Current representation of the entity, as evidence.
    fn snapshot(&self, entity: &EntityRef) -> Result<Value, HookError>;

    fn delete(&self, entity: &EntityRef, mode: DeleteMode) -> Result<(), HookError>;

    /// Replace identifying fields in place and return the new representation.
    fn anonymize(&self, entity: &EntityRef) -> Result<Value, HookError>;
}

/// Entity type → hooks, with an optional catch-all.
#[derive(Clone, Default)]
pub struct HookRegistry {
    by_type: HashMap<EntityType, Arc<dyn EntityHooks>>,
    fallback: Option<Arc<dyn EntityHooks>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.by_type.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("HookRegistry")
            .field("types", &types)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: EntityType, hooks: Arc<dyn EntityHooks>) {
        self.by_type.insert(entity_type, hooks);
    }

    /// Hooks used for entity types with no specific registration.
    pub fn with_fallback(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.fallback = Some(hooks);
        self
    }

    pub fn resolve(&self, entity_type: &EntityType) -> Option<Arc<dyn EntityHooks>> {
        self.by_type
            .get(entity_type)
            .or(self.fallback.as_ref())
            .cloned()
    }
}
