//! Fuzz target for retention.toml parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rl_config::validate::validate_settings;
use rl_config::EngineSettings;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(settings) = EngineSettings::from_toml_str(text) {
        let _ = validate_settings(&settings);
        let _ = settings.hook_timeout();
        let _ = settings.claim_ttl();
    }
});
