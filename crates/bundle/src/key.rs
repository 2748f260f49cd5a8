//! JSON Web Key model.
//!
//! A [`Key`] is one entry of a JWKS document (RFC 7517) plus the bookkeeping
//! the key jar needs for rotation: the instant it was superseded
//! ([`Key::inactive_since`]). That timestamp never leaves the process; it is
//! not part of the serialized form.
//!
//! Private components are wrapped in [`Zeroizing`] so they are scrubbed from
//! memory when the key is dropped, and they are redacted from `Debug` output.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    error::{BundleError, BundleResult},
    types::{KeyType, KeyUse},
};

/// RSA key components (RFC 7518 §6.3), base64url-encoded big-endian integers.
#[derive(Clone, Serialize, Deserialize)]
pub struct RsaParameters {
    /// Modulus.
    pub n: String,
    /// Public exponent.
    pub e: String,
    /// Private exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Zeroizing<String>>,
    /// First prime factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Zeroizing<String>>,
    /// Second prime factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<Zeroizing<String>>,
    /// First factor CRT exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<Zeroizing<String>>,
    /// Second factor CRT exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<Zeroizing<String>>,
    /// First CRT coefficient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<Zeroizing<String>>,
}

/// Elliptic curve key components (RFC 7518 §6.2).
#[derive(Clone, Serialize, Deserialize)]
pub struct EcParameters {
    /// Curve name (`P-256`, `P-384`, ...).
    pub crv: String,
    /// X coordinate.
    pub x: String,
    /// Y coordinate.
    pub y: String,
    /// Private scalar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Zeroizing<String>>,
}

/// Symmetric key (RFC 7518 §6.4).
#[derive(Clone, Serialize, Deserialize)]
pub struct OctParameters {
    /// The secret, base64url-encoded.
    pub k: Zeroizing<String>,
}

/// Type-specific key material, tagged by `kty`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum KeyParameters {
    /// `kty = "RSA"`.
    #[serde(rename = "RSA")]
    Rsa(RsaParameters),
    /// `kty = "EC"`.
    #[serde(rename = "EC")]
    Ec(EcParameters),
    /// `kty = "oct"`.
    #[serde(rename = "oct")]
    Oct(OctParameters),
}

impl KeyParameters {
    fn public_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Rsa(a), Self::Rsa(b)) => a.n == b.n && a.e == b.e,
            (Self::Ec(a), Self::Ec(b)) => a.crv == b.crv && a.x == b.x && a.y == b.y,
            (Self::Oct(a), Self::Oct(b)) => *a.k == *b.k,
            _ => false,
        }
    }
}

/// A single JSON Web Key.
///
/// # Equality
///
/// Two keys are equal when they have the same type, the same public material
/// (the secret for symmetric keys), the same `kid` and the same declared use.
/// Whether private material is present does not matter, so a private key and
/// its public projection with identical metadata compare equal.
///
/// # Example
///
/// ```
/// use oidc_keyjar_bundle::{Key, KeyType, KeyUse};
///
/// let key = Key::symmetric(b"a shared secret").with_use(KeyUse::Sig).with_kid("hmac-1");
///
/// assert_eq!(key.kty(), KeyType::Oct);
/// assert_eq!(key.kid(), Some("hmac-1"));
/// assert!(key.is_active());
/// assert!(key.is_private_key());
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Key {
    #[serde(flatten)]
    params: KeyParameters,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    key_use: Option<KeyUse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_ops: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5c: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5t: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5u: Option<String>,

    #[serde(skip)]
    inactive_since: Option<DateTime<Utc>>,
}

impl Key {
    /// Creates an active key with no `use`, `kid` or `alg`.
    #[must_use]
    pub fn new(params: KeyParameters) -> Self {
        Self {
            params,
            key_use: None,
            kid: None,
            alg: None,
            key_ops: None,
            x5c: None,
            x5t: None,
            x5u: None,
            inactive_since: None,
        }
    }

    /// Wraps a raw shared secret as an `oct` key.
    #[must_use]
    pub fn symmetric(secret: &[u8]) -> Self {
        Self::new(KeyParameters::Oct(OctParameters {
            k: Zeroizing::new(URL_SAFE_NO_PAD.encode(secret)),
        }))
    }

    /// Sets the declared use.
    #[must_use]
    pub fn with_use(mut self, key_use: KeyUse) -> Self {
        self.key_use = Some(key_use);
        self
    }

    /// Sets the key identifier.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Sets the intended algorithm.
    #[must_use]
    pub fn with_alg(mut self, alg: impl Into<String>) -> Self {
        self.alg = Some(alg.into());
        self
    }

    /// Key type.
    #[must_use]
    pub fn kty(&self) -> KeyType {
        match self.params {
            KeyParameters::Rsa(_) => KeyType::Rsa,
            KeyParameters::Ec(_) => KeyType::Ec,
            KeyParameters::Oct(_) => KeyType::Oct,
        }
    }

    /// Type-specific key material.
    #[must_use]
    pub fn params(&self) -> &KeyParameters {
        &self.params
    }

    /// Declared use; `None` means the key may serve any purpose.
    #[must_use]
    pub fn key_use(&self) -> Option<KeyUse> {
        self.key_use
    }

    /// Key identifier.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Replaces the key identifier.
    pub fn set_kid(&mut self, kid: impl Into<String>) {
        self.kid = Some(kid.into());
    }

    /// Intended algorithm, if the JWK declares one.
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// Curve name for EC keys.
    #[must_use]
    pub fn crv(&self) -> Option<&str> {
        match &self.params {
            KeyParameters::Ec(ec) => Some(ec.crv.as_str()),
            _ => None,
        }
    }

    /// When the key was superseded; `None` for active keys.
    #[must_use]
    pub fn inactive_since(&self) -> Option<DateTime<Utc>> {
        self.inactive_since
    }

    /// Whether the key is still in service.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inactive_since.is_none()
    }

    /// Marks the key as superseded at `now`.
    ///
    /// A key that is already inactive keeps its original timestamp, so the
    /// retention window is counted from the first retirement.
    pub fn mark_inactive(&mut self, now: DateTime<Utc>) {
        if self.inactive_since.is_none() {
            self.inactive_since = Some(now);
        }
    }

    /// Overwrites the inactivity timestamp.
    pub fn set_inactive_since(&mut self, since: Option<DateTime<Utc>>) {
        self.inactive_since = since;
    }

    /// Whether the key carries material usable for signing or decryption.
    ///
    /// Symmetric keys always qualify.
    #[must_use]
    pub fn is_private_key(&self) -> bool {
        match &self.params {
            KeyParameters::Rsa(rsa) => rsa.d.is_some(),
            KeyParameters::Ec(ec) => ec.d.is_some(),
            KeyParameters::Oct(_) => true,
        }
    }

    /// Whether the key carries material usable for verification or encryption.
    ///
    /// Symmetric keys always qualify. Asymmetric private keys also carry
    /// their public half.
    #[must_use]
    pub fn is_public_key(&self) -> bool {
        match &self.params {
            KeyParameters::Rsa(rsa) => !rsa.n.is_empty() && !rsa.e.is_empty(),
            KeyParameters::Ec(ec) => !ec.x.is_empty() && !ec.y.is_empty(),
            KeyParameters::Oct(_) => true,
        }
    }

    /// Public projection of the key.
    ///
    /// Returns `None` for symmetric keys: a shared secret has no public half.
    /// The projection keeps the inactivity timestamp.
    #[must_use]
    pub fn to_public(&self) -> Option<Key> {
        let params = match &self.params {
            KeyParameters::Rsa(rsa) => KeyParameters::Rsa(RsaParameters {
                n: rsa.n.clone(),
                e: rsa.e.clone(),
                d: None,
                p: None,
                q: None,
                dp: None,
                dq: None,
                qi: None,
            }),
            KeyParameters::Ec(ec) => KeyParameters::Ec(EcParameters {
                crv: ec.crv.clone(),
                x: ec.x.clone(),
                y: ec.y.clone(),
                d: None,
            }),
            KeyParameters::Oct(_) => return None,
        };
        Some(Key { params, ..self.clone() })
    }

    /// The form of this key that goes into an exported JWKS.
    ///
    /// With `private` the key is returned as is; otherwise its public
    /// projection, which drops symmetric keys entirely.
    #[must_use]
    pub fn export(&self, private: bool) -> Option<Key> {
        if private { Some(self.clone()) } else { self.to_public() }
    }

    /// RFC 7638 JWK thumbprint (SHA-256, base64url).
    #[must_use]
    pub fn thumbprint(&self) -> String {
        let q = |value: &str| serde_json::Value::from(value).to_string();
        let canonical = match &self.params {
            KeyParameters::Rsa(rsa) => {
                format!(r#"{{"e":{},"kty":"RSA","n":{}}}"#, q(&rsa.e), q(&rsa.n))
            },
            KeyParameters::Ec(ec) => format!(
                r#"{{"crv":{},"kty":"EC","x":{},"y":{}}}"#,
                q(&ec.crv),
                q(&ec.x),
                q(&ec.y)
            ),
            KeyParameters::Oct(oct) => format!(r#"{{"k":{},"kty":"oct"}}"#, q(&oct.k)),
        };
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Assigns the thumbprint as `kid` unless the key already has one.
    pub fn add_kid(&mut self) {
        if self.kid.is_none() {
            self.kid = Some(self.thumbprint());
        }
    }

    /// Builds a `jsonwebtoken` verification key from the public material.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Deserialization`] if the components are not
    /// valid base64url or do not form a usable key.
    pub fn decoding_key(&self) -> BundleResult<DecodingKey> {
        match &self.params {
            KeyParameters::Rsa(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| BundleError::deserialization_with_source("invalid RSA key", e)),
            KeyParameters::Ec(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| BundleError::deserialization_with_source("invalid EC key", e)),
            KeyParameters::Oct(oct) => Ok(DecodingKey::from_secret(&decode_b64(&oct.k)?)),
        }
    }

    /// Builds a `jsonwebtoken` signing key from the private material.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::UnsupportedKey`] if the key has no private
    /// material (or uses a curve without a signer), and
    /// [`BundleError::Deserialization`] if the material is corrupt.
    pub fn encoding_key(&self) -> BundleResult<EncodingKey> {
        match &self.params {
            KeyParameters::Rsa(rsa) => {
                let der = crate::generate::rsa_private_der(rsa)?;
                Ok(EncodingKey::from_rsa_der(&der))
            },
            KeyParameters::Ec(ec) => {
                let der = crate::generate::ec_private_pkcs8(ec)?;
                Ok(EncodingKey::from_ec_der(&der))
            },
            KeyParameters::Oct(oct) => Ok(EncodingKey::from_secret(&decode_b64(&oct.k)?)),
        }
    }
}

pub(crate) fn decode_b64(value: &str) -> BundleResult<Zeroizing<Vec<u8>>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map(Zeroizing::new)
        .map_err(|e| BundleError::deserialization_with_source("invalid base64url key component", e))
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.params.public_eq(&other.params)
            && self.kid == other.kid
            && self.key_use == other.key_use
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("kty", &self.kty())
            .field("use", &self.key_use)
            .field("kid", &self.kid)
            .field("crv", &self.crv())
            .field("private", &self.is_private_key())
            .field("inactive_since", &self.inactive_since)
            .finish()
    }
}

/// A JSON Web Key Set: `{"keys": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys of the set, in document order.
    pub keys: Vec<Key>,
}

impl Jwks {
    /// Creates a key set from a list of keys.
    #[must_use]
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Parses a JWKS document that is already in JSON value form.
    ///
    /// Entries whose `kty` this crate does not handle (e.g. `OKP`) are
    /// skipped with a warning; an entry of a handled type that cannot be
    /// decoded fails the whole document.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Deserialization`] if there is no `keys` array
    /// or a supported entry is malformed.
    pub fn from_value(value: &serde_json::Value) -> BundleResult<Self> {
        let entries = value
            .get("keys")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| BundleError::deserialization("Not a proper JWKS: missing 'keys'"))?;

        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            let kty = entry.get("kty").and_then(serde_json::Value::as_str).unwrap_or_default();
            if !matches!(kty, "RSA" | "EC" | "oct") {
                tracing::warn!(kty = %kty, "Skipping key of unsupported type");
                continue;
            }
            let key: Key = serde_json::from_value(entry.clone()).map_err(|e| {
                BundleError::deserialization_with_source(format!("malformed {kty} key"), e)
            })?;
            keys.push(key);
        }
        Ok(Self { keys })
    }

    /// Parses a JWKS document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Deserialization`] if the text is not JSON or
    /// not a JWKS.
    pub fn from_json(json: &str) -> BundleResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| BundleError::deserialization_with_source("JWKS is not valid JSON", e))?;
        Self::from_value(&value)
    }

    /// Serializes the key set to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Deserialization`] if serialization fails.
    pub fn to_json(&self) -> BundleResult<String> {
        serde_json::to_string(self)
            .map_err(|e| BundleError::deserialization_with_source("failed to serialize JWKS", e))
    }

    /// Number of keys in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
