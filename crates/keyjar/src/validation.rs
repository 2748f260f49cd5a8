//! JOSE algorithm checks and algorithm → key type mapping.
//!
//! Key selection works on key types, while tokens name algorithms. The
//! functions here translate between the two (RFC 7518 §3.1 for JWS, §4.1 for
//! JWE). Unknown algorithms map to no key type; the caller decides whether
//! that is an error.

use oidc_keyjar_bundle::KeyType;

use crate::error::{KeyJarError, KeyJarResult};

/// Algorithms a token may never select keys with.
///
/// - `none`: unsigned tokens need no key and must not be verified as if they
///   had one.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Rejects algorithms listed in [`FORBIDDEN_ALGORITHMS`].
///
/// # Errors
///
/// Returns [`KeyJarError::UnsupportedAlgorithm`] for a forbidden algorithm.
///
/// # Examples
///
/// ```
/// use oidc_keyjar::validation::validate_algorithm;
///
/// assert!(validate_algorithm("RS256").is_ok());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> KeyJarResult<()> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(KeyJarError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }
    Ok(())
}

/// Key type able to produce or check a JWS with `alg`.
///
/// ```
/// use oidc_keyjar::validation::jws_alg_to_key_type;
/// use oidc_keyjar_bundle::KeyType;
///
/// assert_eq!(jws_alg_to_key_type("PS384"), Some(KeyType::Rsa));
/// assert_eq!(jws_alg_to_key_type("EdDSA"), None);
/// ```
#[must_use]
pub fn jws_alg_to_key_type(alg: &str) -> Option<KeyType> {
    match alg {
        "RS256" | "RS384" | "RS512" | "PS256" | "PS384" | "PS512" => Some(KeyType::Rsa),
        "ES256" | "ES384" | "ES512" => Some(KeyType::Ec),
        "HS256" | "HS384" | "HS512" => Some(KeyType::Oct),
        _ => None,
    }
}

/// Key type able to wrap or unwrap a content key with the JWE `alg`.
#[must_use]
pub fn jwe_alg_to_key_type(alg: &str) -> Option<KeyType> {
    match alg {
        "RSA1_5" | "RSA-OAEP" | "RSA-OAEP-256" | "RSA-OAEP-384" | "RSA-OAEP-512" => {
            Some(KeyType::Rsa)
        },
        "ECDH-ES" | "ECDH-ES+A128KW" | "ECDH-ES+A192KW" | "ECDH-ES+A256KW" => Some(KeyType::Ec),
        "A128KW" | "A192KW" | "A256KW" | "A128GCMKW" | "A192GCMKW" | "A256GCMKW" | "dir" => {
            Some(KeyType::Oct)
        },
        _ => None,
    }
}

/// Curve an ECDSA algorithm signs on; `None` for anything else.
#[must_use]
pub fn curve_for_alg(alg: &str) -> Option<&'static str> {
    match alg {
        "ES256" => Some("P-256"),
        "ES384" => Some("P-384"),
        "ES512" => Some("P-521"),
        _ => None,
    }
}
