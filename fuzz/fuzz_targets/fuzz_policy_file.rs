//! Fuzz target for policies.json parsing and validation.
//!
//! Parsing and semantic validation must reject bad input with an error,
//! never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rl_config::validate::validate_policies;
use rl_config::PolicyFile;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(file) = PolicyFile::from_json(text) {
        let _ = validate_policies(&file);
    }
});
