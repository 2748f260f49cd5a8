//! Fuzz target for JWKS import.
//!
//! Feeds arbitrary text to `import_jwks_as_json`, then exercises lookup,
//! export and purging on whatever was imported. Every call must return
//! `Ok(...)` or `Err(KeyJarError)`; none may panic.

#![no_main]

use chrono::Utc;
use libfuzzer_sys::fuzz_target;
use oidc_keyjar::{KeyJar, Usage};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut jar = KeyJar::default();
    if jar.import_jwks_as_json(text, "https://op.example.com").is_err() {
        return;
    }

    for usage in [Usage::Sign, Usage::Verify, Usage::Encrypt, Usage::Decrypt] {
        for key in jar.lookup(usage, None, "https://op.example.com/", None, Some("ES256")) {
            let _ = key.thumbprint();
            let _ = key.decoding_key();
        }
    }
    let _ = jar.export_jwks_as_json(false, "https://op.example.com");
    let _ = jar.export_jwks_as_json(true, "https://op.example.com");
    let _ = jar.key_summary("https://op.example.com");
    jar.remove_outdated(Utc::now());
});
