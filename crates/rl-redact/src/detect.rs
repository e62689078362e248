//! Pattern detection of contact data and identifiers inside free text.

use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kind of identifying value found in text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    /// Brazilian CPF in its formatted form (000.000.000-00)
    Cpf,
    Phone,
}

// Compiled once; a pattern that fails to compile is dropped rather than
// aborting the process.
static PATTERNS: Lazy<Vec<(PiiKind, Regex)>> = Lazy::new(|| {
    [
        (
            PiiKind::Email,
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        ),
        (PiiKind::Cpf, r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b"),
        (
            PiiKind::Phone,
            r"(?:\+\d{1,3}\s?)?\(?\d{2,3}\)?[\s-]?\d{4,5}-\d{4}\b",
        ),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
    .collect()
});

/// A detected span in the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiMatch {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
}

/// Detector for identifying values embedded in free text.
#[derive(Debug, Default, Clone)]
pub struct PiiDetector;

impl PiiDetector {
    pub fn new() -> Self {
        Self
    }

    /// All non-overlapping matches, leftmost first.
    pub fn find(&self, text: &str) -> Vec<PiiMatch> {
        let mut found: Vec<PiiMatch> = PATTERNS
            .iter()
            .flat_map(|(kind, re)| {
                re.find_iter(text).map(move |m| PiiMatch {
                    kind: *kind,
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect();
        found.sort_by_key(|m| (m.start, std::cmp::Reverse(m.end)));

        let mut kept: Vec<PiiMatch> = Vec::with_capacity(found.len());
        for m in found {
            if kept.last().map_or(true, |last| m.start >= last.end) {
                kept.push(m);
            }
        }
        kept
    }

    /// Replace every match using `replace`.
    pub fn scrub<F>(&self, text: &str, mut replace: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let matches = self.find(text);
        if matches.is_empty() {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in matches {
            out.push_str(&text[cursor..m.start]);
            out.push_str(&replace(&text[m.start..m.end])?);
            cursor = m.end;
        }
        out.push_str(&text[cursor..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_email_cpf_phone() {
        let d = PiiDetector::new();
        let text = "contact maria@example.org, cpf 123.456.789-09, tel (11) 98765-4321";
        let kinds: Vec<PiiKind> = d.find(text).into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![PiiKind::Email, PiiKind::Cpf, PiiKind::Phone]);
    }

    #[test]
    fn test_clinical_text_untouched() {
        let d = PiiDetector::new();
        let text = "BP 120/80, HbA1c 6.1%, follow-up in 3 months";
        assert!(d.find(text).is_empty());
        assert_eq!(d.scrub(text, |_| Ok("X".into())).unwrap(), text);
    }

    #[test]
    fn test_scrub_replaces_spans() {
        let d = PiiDetector::new();
        let out = d
            .scrub("write to a.b@example.com today", |_| Ok("[EMAIL]".into()))
            .unwrap();
        assert_eq!(out, "write to [EMAIL] today");
    }
}
