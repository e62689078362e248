//! Policy registry: read-only lookup of retention policies.
//!
//! Built once from a validated policy file. Schedules pin a `PolicyId`, so
//! lookups by id must keep working for inactive versions too.

use rl_common::PolicyId;
use rl_config::validate::validate_policies;
use rl_config::{PolicyFile, RetentionPolicy, ValidationError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Registry lookup errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no active retention policy for category {0}")]
    NoActivePolicy(String),

    #[error("unknown retention policy {0}")]
    UnknownPolicy(PolicyId),

    #[error("invalid policy file: {0}")]
    Invalid(#[from] ValidationError),
}

impl From<RegistryError> for rl_common::Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NoActivePolicy(category) => rl_common::Error::PolicyNotFound(category),
            RegistryError::UnknownPolicy(id) => rl_common::Error::PolicyNotFound(id.to_string()),
            RegistryError::Invalid(e) => rl_common::Error::Config(e.to_string()),
        }
    }
}

/// All known policy versions, plus the active version per category.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    by_id: BTreeMap<PolicyId, RetentionPolicy>,
    active: BTreeMap<String, PolicyId>,
}

impl PolicyRegistry {
    /// Validate and index a policy file.
    pub fn from_file(file: PolicyFile) -> Result<Self, RegistryError> {
        validate_policies(&file)?;

        let mut registry = PolicyRegistry::default();
        for policy in file.policies {
            let id = policy.id();
            if policy.active {
                registry.active.insert(policy.category.clone(), id.clone());
            }
            registry.by_id.insert(id, policy);
        }
        Ok(registry)
    }

    /// Convenience constructor around [`PolicyRegistry::from_file`].
    pub fn new(policies: Vec<RetentionPolicy>) -> Result<Self, RegistryError> {
        Self::from_file(PolicyFile {
            policies,
            ..Default::default()
        })
    }

    /// Active policy for a category.
    pub fn resolve(&self, category: &str) -> Result<&RetentionPolicy, RegistryError> {
        self.active
            .get(category)
            .and_then(|id| self.by_id.get(id))
            .ok_or_else(|| RegistryError::NoActivePolicy(category.to_string()))
    }

    /// Any policy version, active or not.
    pub fn get(&self, id: &PolicyId) -> Result<&RetentionPolicy, RegistryError> {
        self.by_id
            .get(id)
            .ok_or_else(|| RegistryError::UnknownPolicy(id.clone()))
    }

    pub fn policies(&self) -> impl Iterator<Item = &RetentionPolicy> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
