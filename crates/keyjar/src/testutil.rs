//! Shared test utilities for key jar testing.
//!
//! This module provides helpers for signing tokens with a jar's keys,
//! crafting raw JWS/JWE strings (for malformed and hostile input), and
//! building jars from fixture keys. It is feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! oidc-keyjar = { path = "../keyjar", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use oidc_keyjar::testutil::{jar_with, signed_jwt};
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Header};
use oidc_keyjar_bundle::{Bundle, Key};

use crate::{jwt::UnverifiedToken, key_jar::KeyJar};

/// Signs `claims` with `key` using `alg`, putting the key's `kid` in the
/// header.
///
/// # Panics
///
/// Panics if the key has no usable private material or encoding fails.
pub fn signed_jwt(key: &Key, alg: Algorithm, claims: &serde_json::Value) -> String {
    let mut header = Header::new(alg);
    header.kid = key.kid().map(str::to_owned);
    signed_jwt_with_header(key, header, claims)
}

/// Signs `claims` with `key` using a caller-built header.
///
/// # Panics
///
/// Panics if the key has no usable private material or encoding fails.
pub fn signed_jwt_with_header(key: &Key, header: Header, claims: &serde_json::Value) -> String {
    let encoding_key = key.encoding_key().expect("fixture key must be able to sign");
    jsonwebtoken::encode(&header, claims, &encoding_key).expect("Failed to encode test JWT")
}

/// Creates a raw JWS string from arbitrary header and payload JSON.
///
/// The resulting token has the structure `{header_b64}.{payload_b64}.` with
/// an empty signature.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Creates a five-part JWE string with the given protected header and
/// placeholder key, IV, ciphertext and tag segments.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwe(header_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let segments: [&[u8]; 4] = [b"wrapped-key", b"iv", b"ciphertext", b"tag"];
    let [key, iv, ciphertext, tag] = segments.map(|part| URL_SAFE_NO_PAD.encode(part));
    format!("{header_b64}.{key}.{iv}.{ciphertext}.{tag}")
}

/// Parses a token, panicking if it is malformed.
///
/// # Panics
///
/// Panics if `token` is not a compact JWS or JWE.
pub fn parse_token(token: &str) -> UnverifiedToken {
    UnverifiedToken::parse(token).expect("fixture token must parse")
}

/// A jar holding `keys` for `owner` in a single literal bundle.
#[must_use]
pub fn jar_with(owner: &str, keys: Vec<Key>) -> KeyJar {
    let mut jar = KeyJar::default();
    jar.add_bundle(owner, Box::new(Bundle::from_keys(keys)));
    jar
}

/// Asserts that a [`KeyJarResult`](crate::KeyJarResult) is an `Err` matching
/// the given [`KeyJarError`](crate::KeyJarError) variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use oidc_keyjar::{KeyJarError, KeyJarResult, assert_keyjar_error};
///
/// let result: KeyJarResult<()> = Err(KeyJarError::not_found("https://op"));
/// assert_keyjar_error!(result, NotFound);
/// ```
#[macro_export]
macro_rules! assert_keyjar_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::KeyJarError::$variant { .. })),
            "expected KeyJarError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::KeyJarError::$variant { .. })),
            "{}: expected KeyJarError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
