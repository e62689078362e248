//! Document anonymizer.
//!
//! Two passes over a JSON object:
//! 1. collect the values of identifying fields (by configuration or by
//!    field name classification), at any depth;
//! 2. rebuild the document, replacing identifying values with keyed
//!    placeholders and scrubbing those values (plus detected contact data)
//!    from every other string.
//!
//! Any string that still contains an identifying value after scrubbing is
//! replaced as a whole.

use crate::{FieldClass, KeyMaterial, PiiDetector, RedactionError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Identifying values shorter than this are replaced in their own field
/// but not searched for inside other text.
pub const MIN_SCRUB_LEN: usize = 3;

/// Per entity type anonymization rules.
#[derive(Debug, Clone, Default)]
pub struct AnonymizationRules {
    /// Always treated as identifying.
    pub identifying_fields: BTreeSet<String>,
    /// Never replaced, even when the name looks identifying. Still scrubbed.
    pub preserved_fields: BTreeSet<String>,
}

impl AnonymizationRules {
    pub fn new<I, J, S, T>(identifying: I, preserved: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            identifying_fields: identifying.into_iter().map(Into::into).collect(),
            preserved_fields: preserved.into_iter().map(Into::into).collect(),
        }
    }

    /// Classification used for a field, or `None` when it is kept.
    pub fn classify(&self, field: &str) -> Option<FieldClass> {
        if self.preserved_fields.contains(field) {
            return None;
        }
        let class = FieldClass::classify_name(field);
        if self.identifying_fields.contains(field) {
            return Some(if class.is_identifying() {
                class
            } else {
                FieldClass::Identifier
            });
        }
        class.is_identifying().then_some(class)
    }
}

/// Result of anonymizing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizedDocument {
    pub document: Value,

    /// JSON pointer paths of replaced fields, with their class.
    pub replaced_fields: BTreeMap<String, FieldClass>,

    /// JSON pointer paths of strings that were scrubbed.
    pub scrubbed_fields: Vec<String>,
}

/// The anonymization engine.
pub struct Anonymizer {
    key: KeyMaterial,
    rules: AnonymizationRules,
    detector: PiiDetector,
}

impl Anonymizer {
    pub fn new(key: KeyMaterial, rules: AnonymizationRules) -> Self {
        Self {
            key,
            rules,
            detector: PiiDetector::new(),
        }
    }

    /// Anonymize a JSON object.
    pub fn anonymize(&self, document: &Value) -> Result<AnonymizedDocument> {
        let kind = match document {
            Value::Object(_) => None,
            Value::Null => Some("null"),
            Value::Bool(_) => Some("a boolean"),
            Value::Number(_) => Some("a number"),
            Value::String(_) => Some("a string"),
            Value::Array(_) => Some("an array"),
        };
        if let Some(kind) = kind {
            return Err(RedactionError::NotAnObject(kind));
        }

        let mut originals = BTreeSet::new();
        self.collect(document, false, &mut originals);
        // Longest first so a value is never partially replaced by a
        // shorter one it contains.
        let mut needles: Vec<String> = originals
            .into_iter()
            .filter(|v| v.chars().count() >= MIN_SCRUB_LEN)
            .collect();
        needles.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

        let mut out = AnonymizedDocument {
            document: Value::Null,
            replaced_fields: BTreeMap::new(),
            scrubbed_fields: Vec::new(),
        };
        let rebuilt = self.rebuild(document, "", None, &needles, &mut out)?;
        out.document = rebuilt;
        Ok(out)
    }

    fn collect(&self, value: &Value, identifying: bool, acc: &mut BTreeSet<String>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let here = identifying || self.rules.classify(k).is_some();
                    self.collect(v, here, acc);
                }
            }
            Value::Array(items) => {
                for v in items {
                    self.collect(v, identifying, acc);
                }
            }
            Value::String(s) if identifying && !s.is_empty() => {
                acc.insert(s.clone());
            }
            Value::Number(n) if identifying => {
                acc.insert(n.to_string());
            }
            _ => {}
        }
    }

    fn rebuild(
        &self,
        value: &Value,
        path: &str,
        class: Option<FieldClass>,
        needles: &[String],
        out: &mut AnonymizedDocument,
    ) -> Result<Value> {
        if let Some(class) = class {
            return match value {
                Value::Null | Value::Bool(_) => Ok(value.clone()),
                Value::String(s) if s.is_empty() => Ok(value.clone()),
                Value::String(s) => {
                    out.replaced_fields.insert(path.to_string(), class);
                    Ok(Value::String(self.key.placeholder(s)?))
                }
                Value::Number(n) => {
                    out.replaced_fields.insert(path.to_string(), class);
                    Ok(Value::String(self.key.placeholder(&n.to_string())?))
                }
                Value::Object(_) | Value::Array(_) => {
                    out.replaced_fields.insert(path.to_string(), class);
                    let canonical = serde_json::to_string(value)?;
                    Ok(Value::String(self.key.placeholder(&canonical)?))
                }
            };
        }

        match value {
            Value::Object(map) => {
                let mut rebuilt = Map::with_capacity(map.len());
                for (k, v) in map {
                    let child = format!("{}/{}", path, escape_pointer(k));
                    let class = self.rules.classify(k);
                    rebuilt.insert(k.clone(), self.rebuild(v, &child, class, needles, out)?);
                }
                Ok(Value::Object(rebuilt))
            }
            Value::Array(items) => {
                let mut rebuilt = Vec::with_capacity(items.len());
                for (i, v) in items.iter().enumerate() {
                    let child = format!("{}/{}", path, i);
                    rebuilt.push(self.rebuild(v, &child, None, needles, out)?);
                }
                Ok(Value::Array(rebuilt))
            }
            Value::String(s) => {
                let scrubbed = self.scrub(s, needles)?;
                if scrubbed != *s {
                    out.scrubbed_fields.push(path.to_string());
                }
                Ok(Value::String(scrubbed))
            }
            other => Ok(other.clone()),
        }
    }

    fn scrub(&self, text: &str, needles: &[String]) -> Result<String> {
        let mut current = text.to_string();
        for needle in needles {
            if current.contains(needle.as_str()) {
                current = current.replace(needle.as_str(), &self.key.placeholder(needle)?);
            }
        }
        let current = self
            .detector
            .scrub(&current, |found| self.key.placeholder(found))?;

        // Fail closed: replacement can join text around a placeholder into
        // a new occurrence.
        if needles.iter().any(|n| current.contains(n.as_str())) {
            return self.key.placeholder(text);
        }
        Ok(current)
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
