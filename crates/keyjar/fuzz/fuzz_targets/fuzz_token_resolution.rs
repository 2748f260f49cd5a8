//! Structured fuzz target for token-driven key resolution.
//!
//! Uses the `arbitrary` crate to generate JWT-like inputs, assembles them
//! into compact JWS or JWE strings and resolves verification and decryption
//! keys against a jar holding keys for a few owners. This reaches the
//! owner and `kid` fallback paths that raw byte fuzzing rarely gets to.

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use libfuzzer_sys::fuzz_target;
use oidc_keyjar::{KeyJar, OWN_KEYS, ResolutionOptions, UnverifiedToken};
use oidc_keyjar_bundle::KeyUse;

const OWNERS: [&str; 3] = ["https://op.example.com", "https://op.example.com/", "client-1"];

#[derive(Debug, Arbitrary)]
struct FuzzedToken {
    alg: FuzzedAlg,
    kid: Option<String>,
    jku: Option<String>,
    /// Index into `OWNERS` (no issuer when out of range), or a raw issuer.
    iss: Result<u8, String>,
    aud: Vec<String>,
    client_id: Option<String>,
    encrypted: bool,
    allow_missing_kid: bool,
    no_kid_issuer: Option<Vec<String>>,
    signature_bytes: Vec<u8>,
}

/// Algorithm values covering known attack vectors and edge cases.
#[derive(Debug, Arbitrary)]
enum FuzzedAlg {
    None,
    HS256,
    RS256,
    ES256,
    ES512,
    RsaOaep,
    Dir,
    Missing,
    Other(String),
}

impl FuzzedAlg {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::None => Some("none"),
            Self::HS256 => Some("HS256"),
            Self::RS256 => Some("RS256"),
            Self::ES256 => Some("ES256"),
            Self::ES512 => Some("ES512"),
            Self::RsaOaep => Some("RSA-OAEP"),
            Self::Dir => Some("dir"),
            Self::Missing => None,
            Self::Other(s) => Some(s),
        }
    }
}

fn build_token(input: &FuzzedToken) -> String {
    let mut header = serde_json::Map::new();
    if let Some(alg) = input.alg.as_str() {
        header.insert("alg".into(), alg.into());
    }
    if let Some(kid) = &input.kid {
        header.insert("kid".into(), kid.as_str().into());
    }
    if let Some(jku) = &input.jku {
        header.insert("jku".into(), jku.as_str().into());
    }
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::Value::Object(header).to_string());

    if input.encrypted {
        let tail = URL_SAFE_NO_PAD.encode(&input.signature_bytes);
        return format!("{header_b64}.{tail}.{tail}.{tail}.{tail}");
    }

    let mut claims = serde_json::Map::new();
    let iss = match &input.iss {
        Ok(index) => OWNERS.get(usize::from(*index)).copied().unwrap_or("").to_owned(),
        Err(raw) => raw.clone(),
    };
    claims.insert("iss".into(), iss.into());
    claims.insert("aud".into(), input.aud.clone().into());
    if let Some(client_id) = &input.client_id {
        claims.insert("client_id".into(), client_id.as_str().into());
    }
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::Value::Object(claims).to_string());
    let sig_b64 = URL_SAFE_NO_PAD.encode(&input.signature_bytes);

    format!("{header_b64}.{payload_b64}.{sig_b64}")
}

fn fixture_jar() -> KeyJar {
    let mut jar = KeyJar::default();
    jar.add_symmetric(OWN_KEYS, b"own-secret", &[KeyUse::Sig, KeyUse::Enc]);
    jar.add_symmetric(OWNERS[0], b"op-secret-1", &[KeyUse::Sig]);
    jar.add_symmetric(OWNERS[0], b"op-secret-2", &[]);
    jar.add_symmetric(OWNERS[2], b"client-secret", &[KeyUse::Enc]);
    jar
}

fuzz_target!(|input: FuzzedToken| {
    let token = build_token(&input);
    let Ok(token) = UnverifiedToken::parse(&token) else {
        return;
    };

    let options = ResolutionOptions::builder()
        .allow_missing_kid(input.allow_missing_kid)
        .maybe_no_kid_issuer(
            input.no_kid_issuer.clone().map(|kids| [(OWNERS[0].to_owned(), kids)].into()),
        )
        .build();

    let jar = fixture_jar();
    if token.is_encrypted() {
        if let Ok(keys) = jar.jwt_decrypt_keys(&token) {
            assert!(keys.iter().all(|key| key.is_private_key()));
        }
    } else if let Ok(keys) = jar.jwt_verify_keys(&token, &options) {
        assert!(keys.iter().all(|key| key.is_public_key()));
    }
});
