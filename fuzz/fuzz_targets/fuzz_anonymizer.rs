//! Fuzz target for the keyed anonymizer.
//!
//! Arbitrary JSON documents must anonymize without panicking, and a string
//! under a configured identifying field must be replaced.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rl_redact::{AnonymizationRules, Anonymizer, KeyMaterial};
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(document) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let rules = AnonymizationRules::new(["tax_id"], ["diagnosis"]);
    let anonymizer = Anonymizer::new(KeyMaterial::from_bytes([7u8; 32], "fuzz"), rules);
    let Ok(out) = anonymizer.anonymize(&document) else {
        return;
    };

    if let Some(Value::String(secret)) = document.get("tax_id") {
        if !secret.is_empty() {
            assert_ne!(out.document.get("tax_id"), document.get("tax_id"));
        }
    }
});
