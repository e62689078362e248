//! Entity, schedule, policy and run identity types.
//!
//! A tracked record is identified by an opaque `(entity_type, entity_id)`
//! pair. The engine never holds a reference into a collaborator's data
//! model; hooks are resolved per entity type at execution time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Entity type tag (e.g. `patient`, `staff_member`).
///
/// Lowercase ASCII letters, digits, `_` and `-`; never contains `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    /// Parse and validate an entity type tag.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > 64 {
            return None;
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return None;
        }
        Some(EntityType(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of an entity within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tagged reference to a retained entity owned by a collaborator.
///
/// Displayed and parsed as `type:id`. The id may itself contain `:`,
/// only the first separator is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityRef {
    /// Build a reference, validating the type tag.
    pub fn new(entity_type: &str, entity_id: impl Into<String>) -> Option<Self> {
        let entity_type = EntityType::parse(entity_type)?;
        let entity_id = entity_id.into();
        if entity_id.is_empty() {
            return None;
        }
        Some(EntityRef {
            entity_type,
            entity_id: EntityId(entity_id),
        })
    }

    /// Stable key used for storage paths and shard assignment.
    pub fn key(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }

    /// Bucket of this entity in a hash-range partition of `count` shards.
    pub fn shard_bucket(&self, count: u32) -> u32 {
        if count <= 1 {
            return 0;
        }
        let digest = Sha256::digest(self.key().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % count as u64) as u32
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for EntityRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, id) = s
            .split_once(':')
            .ok_or_else(|| format!("entity reference must be type:id, got {:?}", s))?;
        EntityRef::new(ty, id).ok_or_else(|| format!("invalid entity reference: {:?}", s))
    }
}

/// Retention schedule identifier.
///
/// Format: `rs-<12 hex chars>`
/// Example: `rs-3f9a0c1d22be`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub String);

impl ScheduleId {
    /// Generate a new schedule ID.
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        ScheduleId(format!("rs-{}", &uuid[..12]))
    }

    /// Parse an existing schedule ID string.
    pub fn parse(s: &str) -> Option<Self> {
        let hex_part = s.strip_prefix("rs-")?;
        if hex_part.len() != 12 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(ScheduleId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Versioned policy identifier.
///
/// Format: `<category>@v<version>`
/// Example: `medical_records@v2`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(pub String);

impl PolicyId {
    pub fn new(category: &str, version: u32) -> Self {
        PolicyId(format!("{}@v{}", category, version))
    }

    /// Split into `(category, version)`.
    pub fn parts(&self) -> Option<(&str, u32)> {
        let (category, version) = self.0.rsplit_once("@v")?;
        if category.is_empty() {
            return None;
        }
        Some((category, version.parse().ok()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Orchestrator run identifier.
///
/// Format: `run-<12 hex chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        RunId(format!("run-{}", &uuid[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash-range shard selector, written `index/count` (e.g. `0/4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSpec {
    pub index: u32,
    pub count: u32,
}

impl ShardSpec {
    /// Whether this shard owns the given entity.
    pub fn contains(&self, entity: &EntityRef) -> bool {
        entity.shard_bucket(self.count) == self.index
    }
}

impl FromStr for ShardSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, count) = s
            .split_once('/')
            .ok_or_else(|| format!("shard must be index/count, got {:?}", s))?;
        let index: u32 = index
            .trim()
            .parse()
            .map_err(|_| format!("invalid shard index: {:?}", index))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid shard count: {:?}", count))?;
        if count == 0 || index >= count {
            return Err(format!("shard index {} out of range for {} shards", index, count));
        }
        Ok(ShardSpec { index, count })
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entity_ref_roundtrip_display() {
        let r: EntityRef = "patient:12345".parse().unwrap();
        assert_eq!(r.entity_type.as_str(), "patient");
        assert_eq!(r.entity_id.as_str(), "12345");
        assert_eq!(r.to_string(), "patient:12345");
    }

    #[test]
    fn test_entity_ref_id_may_contain_colon() {
        let r: EntityRef = "document:2024:0042".parse().unwrap();
        assert_eq!(r.entity_type.as_str(), "document");
        assert_eq!(r.entity_id.as_str(), "2024:0042");
    }

    #[test]
    fn test_entity_ref_rejects_bad_type() {
        assert!("Patient:1".parse::<EntityRef>().is_err());
        assert!(":1".parse::<EntityRef>().is_err());
        assert!("patient:".parse::<EntityRef>().is_err());
        assert!("patient".parse::<EntityRef>().is_err());
    }

    #[test]
    fn test_schedule_id_format() {
        let id = ScheduleId::new();
        assert!(id.0.starts_with("rs-"));
        assert_eq!(id.0.len(), 15);
        assert!(ScheduleId::parse(&id.0).is_some());
    }

    #[test]
    fn test_schedule_id_parse_invalid() {
        assert!(ScheduleId::parse("rs-xyz").is_none());
        assert!(ScheduleId::parse("run-3f9a0c1d22be").is_none());
        assert!(ScheduleId::parse("rs-3f9a0c1d22bg").is_none());
    }

    #[test]
    fn test_policy_id_parts() {
        let id = PolicyId::new("medical_records", 3);
        assert_eq!(id.as_str(), "medical_records@v3");
        assert_eq!(id.parts(), Some(("medical_records", 3)));
        assert_eq!(PolicyId("nover".to_string()).parts(), None);
    }

    #[test]
    fn test_run_id_format() {
        let a = RunId::new();
        let b = RunId::new();
        assert!(a.0.starts_with("run-"));
        assert_eq!(a.0.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_shard_spec_parse() {
        let s: ShardSpec = "1/4".parse().unwrap();
        assert_eq!(s, ShardSpec { index: 1, count: 4 });
        assert!("4/4".parse::<ShardSpec>().is_err());
        assert!("0/0".parse::<ShardSpec>().is_err());
        assert!("a/2".parse::<ShardSpec>().is_err());
    }

    proptest! {
        #[test]
        fn shards_partition_entities(id in "[a-z0-9]{1,16}", count in 1u32..16) {
            let entity = EntityRef::new("patient", id).unwrap();
            let owners = (0..count)
                .filter(|i| ShardSpec { index: *i, count }.contains(&entity))
                .count();
            prop_assert_eq!(owners, 1);
        }
    }
}
