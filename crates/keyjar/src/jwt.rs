//! Token-driven key resolution.
//!
//! This module reads the parts of a compact JWS or JWE that decide which keys
//! could have produced it, and resolves them against a [`KeyJar`]. Nothing
//! here verifies a signature or decrypts anything; the keys returned are
//! handed to a JOSE library.
//!
//! # Example
//!
//! ```no_run
//! // Requires a signed token string.
//! use oidc_keyjar::{KeyJar, ResolutionOptions, UnverifiedToken};
//!
//! # fn example(jar: &KeyJar, token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let token = UnverifiedToken::parse(token)?;
//! let keys = jar.jwt_verify_keys(&token, &ResolutionOptions::default())?;
//! println!("{} candidate keys for {:?}", keys.len(), token.issuer());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use oidc_keyjar_bundle::{Key, KeyType};
use serde::{Deserialize, Serialize};

use crate::{
    error::{KeyJarError, KeyJarResult},
    key_jar::{KeyJar, OWN_KEYS},
    selection::Usage,
    validation::{jwe_alg_to_key_type, jws_alg_to_key_type, validate_algorithm},
};

/// The JOSE header members that steer key selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signature or key management algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// URL of a JWKS holding the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jku: Option<String>,
    /// Content encryption algorithm (JWE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
}

/// A compact JWS or JWE, decoded but not verified.
#[derive(Clone, Debug, PartialEq)]
pub struct UnverifiedToken {
    header: TokenHeader,
    claims: serde_json::Map<String, serde_json::Value>,
    encrypted: bool,
}

fn decode_segment(segment: &str, what: &str) -> KeyJarResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| KeyJarError::malformed_data(format!("Failed to decode token {what}: {e}")))
}

impl UnverifiedToken {
    /// Decodes a compact serialization.
    ///
    /// Three segments are read as a JWS, whose payload must be a JSON object.
    /// Five segments are read as a JWE; its claims are not readable without
    /// decryption and stay empty.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::MalformedData`] for any other segment count, or
    /// if the header or JWS payload is not base64url-encoded JSON.
    pub fn parse(token: &str) -> KeyJarResult<Self> {
        let parts: Vec<&str> = token.split('.').collect();
        let encrypted = match parts.len() {
            3 => false,
            5 => true,
            n => {
                return Err(KeyJarError::malformed_data(format!(
                    "Token must have 3 (JWS) or 5 (JWE) parts, found {n}"
                )));
            },
        };

        let header: TokenHeader = serde_json::from_slice(&decode_segment(parts[0], "header")?)
            .map_err(|e| KeyJarError::malformed_data(format!("Failed to parse token header: {e}")))?;

        let claims = if encrypted {
            serde_json::Map::new()
        } else {
            let payload = decode_segment(parts[1], "payload")?;
            match serde_json::from_slice(&payload) {
                Ok(serde_json::Value::Object(claims)) => claims,
                Ok(_) => return Err(KeyJarError::malformed_data("Token payload is not a JSON object")),
                Err(e) => {
                    return Err(KeyJarError::malformed_data(format!(
                        "Failed to parse token claims: {e}"
                    )));
                },
            }
        };

        Ok(Self { header, claims, encrypted })
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    /// The unverified claims; empty for a JWE.
    #[must_use]
    pub fn claims(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.claims
    }

    /// Whether the token is a JWE.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// The `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.claims.get("iss").and_then(serde_json::Value::as_str)
    }

    /// The `aud` claim, which may be a single string or a list.
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        match self.claims.get("aud") {
            Some(serde_json::Value::String(aud)) => vec![aud.as_str()],
            Some(serde_json::Value::Array(auds)) => {
                auds.iter().filter_map(serde_json::Value::as_str).collect()
            },
            _ => Vec::new(),
        }
    }

    /// The `client_id` claim.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.claims.get("client_id").and_then(serde_json::Value::as_str)
    }
}

/// Caller policy for token-driven key resolution.
///
/// # Example
///
/// ```
/// use oidc_keyjar::ResolutionOptions;
///
/// let options = ResolutionOptions::builder()
///     .allow_missing_kid(true)
///     .issuer("https://op.example.com")
///     .build();
/// assert!(!options.trusting);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, bon::Builder)]
pub struct ResolutionOptions {
    /// Accept every candidate when a token has no `kid` and an owner holds
    /// several matching keys.
    #[builder(default)]
    pub allow_missing_kid: bool,

    /// Owners allowed to omit `kid`, with the kids they may use. An empty
    /// list admits every candidate of that owner.
    #[builder(default)]
    pub no_kid_issuer: HashMap<String, Vec<String>>,

    /// Fetch the JWKS named by a token's `jku` header for its issuer.
    ///
    /// This lets the token choose where its verification keys come from.
    /// Only enable it for issuers whose `jku` hosts are trusted by other
    /// means.
    #[builder(default)]
    pub trusting: bool,

    /// Issuer to use when the token carries no `iss` claim.
    #[builder(into)]
    pub issuer: Option<String>,
}

impl ResolutionOptions {
    fn issuer_of<'a>(&'a self, token: &'a UnverifiedToken) -> Option<&'a str> {
        token.issuer().or(self.issuer.as_deref()).filter(|iss| !iss.is_empty())
    }
}

/// Key type implied by a token's `alg`; `None` when the header has none.
fn key_type_for(
    alg: Option<&str>,
    to_key_type: fn(&str) -> Option<KeyType>,
) -> KeyJarResult<Option<KeyType>> {
    let Some(alg) = alg else {
        return Ok(None);
    };
    validate_algorithm(alg)?;
    to_key_type(alg).map(Some).ok_or_else(|| {
        KeyJarError::unsupported_algorithm(format!("No key type serves algorithm '{alg}'"))
    })
}

impl KeyJar {
    /// Own keys that may decrypt `token`.
    ///
    /// Only keys with private material are returned; symmetric keys always
    /// qualify.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::UnsupportedAlgorithm`] if the header's `alg`
    /// is forbidden or not a known key management algorithm.
    pub fn jwt_decrypt_keys(&self, token: &UnverifiedToken) -> KeyJarResult<Vec<&Key>> {
        let key_type = key_type_for(token.header.alg.as_deref(), jwe_alg_to_key_type)?;
        let kid = token.header.kid.as_deref();
        if kid.is_none() {
            tracing::info!("Missing kid");
        }

        let keys = self.lookup(Usage::Decrypt, key_type, OWN_KEYS, None, None);
        let options = ResolutionOptions::builder()
            .no_kid_issuer(HashMap::from([(OWN_KEYS.to_owned(), Vec::new())]))
            .build();
        let keys = self.add_key(keys, OWN_KEYS, Usage::Decrypt, key_type, kid, &options);

        Ok(keys.into_iter().filter(|key| key.is_private_key()).collect())
    }

    /// Keys that may verify `token`.
    ///
    /// Own verification keys come first, then the keys of the issuer (`iss`,
    /// or [`ResolutionOptions::issuer`]), of every audience and of the
    /// `client_id`, each resolved through [`add_key`](Self::add_key). Only
    /// keys with public material are returned; symmetric keys qualify.
    ///
    /// This never fetches. Use
    /// [`get_jwt_verify_keys`](Self::get_jwt_verify_keys) to honour `jku`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::UnsupportedAlgorithm`] if the header's `alg`
    /// is forbidden or not a known signature algorithm.
    pub fn jwt_verify_keys(
        &self,
        token: &UnverifiedToken,
        options: &ResolutionOptions,
    ) -> KeyJarResult<Vec<&Key>> {
        let key_type = key_type_for(token.header.alg.as_deref(), jws_alg_to_key_type)?;
        let kid = token.header.kid.as_deref();
        if kid.is_none() {
            tracing::info!("Missing kid");
        }

        let mut keys = self.lookup(Usage::Verify, key_type, OWN_KEYS, None, None);
        if let Some(issuer) = options.issuer_of(token) {
            keys = self.add_key(keys, issuer, Usage::Verify, key_type, kid, options);
        }
        for audience in token.audiences() {
            keys = self.add_key(keys, audience, Usage::Verify, key_type, kid, options);
        }
        if let Some(client_id) = token.client_id() {
            keys = self.add_key(keys, client_id, Usage::Verify, key_type, kid, options);
        }

        Ok(keys.into_iter().filter(|key| key.is_public_key()).collect())
    }

    /// [`jwt_verify_keys`](Self::jwt_verify_keys), after first extending
    /// trust to the token's `jku` when `options.trusting` is set.
    ///
    /// # Errors
    ///
    /// Same as [`jwt_verify_keys`](Self::jwt_verify_keys). A failed `jku`
    /// fetch is logged, not returned.
    pub async fn get_jwt_verify_keys(
        &mut self,
        token: &UnverifiedToken,
        options: &ResolutionOptions,
    ) -> KeyJarResult<Vec<&Key>> {
        self.extend_trust(token, options).await;
        self.jwt_verify_keys(token, options)
    }

    /// Fetches the JWKS named by the token's `jku` and adds it to the issuer.
    ///
    /// Happens only when `options.trusting` is set, the token names an
    /// issuer, and none of the issuer's bundles already has `jku` as its
    /// source. An issuer already held with the trailing slash toggled is
    /// extended under its stored name. The new bundle is kept only if the
    /// fetch succeeds.
    ///
    /// Returns whether a bundle was added.
    #[tracing::instrument(skip(self, token, options))]
    pub async fn extend_trust(&mut self, token: &UnverifiedToken, options: &ResolutionOptions) -> bool {
        if !options.trusting {
            return false;
        }
        let Some(jku) = token.header.jku.as_deref() else {
            return false;
        };
        let Some(issuer) = options.issuer_of(token) else {
            return false;
        };
        // The issuer may be stored with or without a trailing slash.
        let issuer = self.resolve_owner(issuer).map_or(issuer, |(stored, _)| stored).to_owned();
        if self.find(jku, &issuer).is_some() {
            return false;
        }

        tracing::warn!(issuer = %issuer, jku = %jku, "Extending trust to key set named by token");

        let bundle_options = self.bundle_options_for(jku);
        let mut bundle = match self.factory().remote(jku, &bundle_options) {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::error!(issuer = %issuer, jku = %jku, error = %e, "Rejected jku");
                return false;
            },
        };
        if let Err(e) = bundle.update().await {
            tracing::error!(issuer = %issuer, jku = %jku, error = %e, "Failed to fetch jku key set");
            return false;
        }

        self.add_bundle(&issuer, bundle);
        true
    }
}
