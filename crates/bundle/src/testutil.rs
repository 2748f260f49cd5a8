//! Shared test utilities for key and bundle testing.
//!
//! Helpers here build keys with predictable identifiers and serve them as
//! JWKS text, so tests across the workspace describe fixtures the same way.
//! It is feature-gated behind `testutil` to prevent leaking into production
//! builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! oidc-keyjar-bundle = { path = "../bundle", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use oidc_keyjar_bundle::testutil::{ec_key, oct_key};
//! ```

use chrono::{DateTime, Utc};

use crate::{
    error::BundleResult,
    generate::{MIN_RSA_KEY_SIZE, new_ec_key, new_rsa_key},
    key::{Jwks, Key},
    types::KeyUse,
};

/// RSA key size used by test fixtures.
///
/// `jsonwebtoken` refuses to sign or verify with RSA keys below 2048 bits,
/// so fixtures that go near a signer use this size.
pub const TEST_RSA_KEY_SIZE: usize = 2048;

/// A fresh RSA private key with the given `kid` and use.
///
/// # Panics
///
/// Panics if key generation fails.
#[must_use]
pub fn rsa_key(kid: &str, key_use: KeyUse) -> Key {
    new_rsa_key(TEST_RSA_KEY_SIZE).expect("RSA key generation failed").with_kid(kid).with_use(key_use)
}

/// A fresh RSA private key at the smallest supported size.
///
/// Cheaper than [`rsa_key`]; only for tests that never sign.
///
/// # Panics
///
/// Panics if key generation fails.
#[must_use]
pub fn small_rsa_key(kid: &str, key_use: KeyUse) -> Key {
    new_rsa_key(MIN_RSA_KEY_SIZE).expect("RSA key generation failed").with_kid(kid).with_use(key_use)
}

/// A fresh P-256 private key with the given `kid` and use.
///
/// # Panics
///
/// Panics if key generation fails.
#[must_use]
pub fn ec_key(kid: &str, key_use: KeyUse) -> Key {
    ec_key_on("P-256", kid, key_use)
}

/// A fresh EC private key on `crv` with the given `kid` and use.
///
/// # Panics
///
/// Panics if the curve is not supported.
#[must_use]
pub fn ec_key_on(crv: &str, kid: &str, key_use: KeyUse) -> Key {
    new_ec_key(crv).expect("EC key generation failed").with_kid(kid).with_use(key_use)
}

/// A symmetric key whose secret is derived from `kid`.
#[must_use]
pub fn oct_key(kid: &str, key_use: KeyUse) -> Key {
    Key::symmetric(format!("secret-for-{kid}").as_bytes()).with_kid(kid).with_use(key_use)
}

/// The key marked inactive at `since`.
#[must_use]
pub fn retired(mut key: Key, since: DateTime<Utc>) -> Key {
    key.mark_inactive(since);
    key
}

/// JWKS text for `keys`, public projections unless `private`.
///
/// # Panics
///
/// Panics if serialization fails.
#[must_use]
pub fn jwks_json(keys: &[Key], private: bool) -> String {
    let exported = keys.iter().filter_map(|k| k.export(private)).collect();
    Jwks::new(exported).to_json().expect("JWKS serialization failed")
}

/// Identifiers of `keys`, in order, with `"-"` for keys without one.
#[must_use]
pub fn kids<'a>(keys: impl IntoIterator<Item = &'a Key>) -> Vec<&'a str> {
    keys.into_iter().map(|k| k.kid().unwrap_or("-")).collect()
}

/// Assert that a [`BundleResult`] failed with the given variant pattern.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use oidc_keyjar_bundle::{BundleError, BundleResult, assert_bundle_error};
///
/// let result: BundleResult<()> = Err(BundleError::remote_update("https://op/jwks", 500));
/// assert_bundle_error!(result, BundleError::RemoteUpdate { status: 500, .. });
/// ```
#[macro_export]
macro_rules! assert_bundle_error {
    ($result:expr, $pattern:pat) => {
        assert!(matches!($result, Err($pattern)), "expected {}, got: {:?}", stringify!($pattern), $result,);
    };
}

/// Unwraps a [`BundleResult`], panicking with the error on failure.
///
/// # Panics
///
/// Panics if `result` is an error.
pub fn bundle_ok<T>(result: BundleResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("expected Ok, got BundleError: {e:?}"),
    }
}
