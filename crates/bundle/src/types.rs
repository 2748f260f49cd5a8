//! Key classification types shared by bundles and the key jar.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::BundleError;

/// JWK key type (`kty`).
///
/// # Examples
///
/// ```
/// use oidc_keyjar_bundle::KeyType;
///
/// assert_eq!("rsa".parse::<KeyType>().unwrap(), KeyType::Rsa);
/// assert_eq!(KeyType::Oct.to_string(), "oct");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyType {
    /// RSA key pair.
    #[serde(rename = "RSA")]
    Rsa,
    /// Elliptic curve key pair.
    #[serde(rename = "EC")]
    Ec,
    /// Symmetric key (octet sequence).
    #[serde(rename = "oct")]
    Oct,
}

impl KeyType {
    /// The `kty` value as it appears in a JWK.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
            Self::Oct => "oct",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = BundleError;

    /// Parses a key type case-insensitively, the way key specifications are written.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RSA" => Ok(Self::Rsa),
            "EC" => Ok(Self::Ec),
            "OCT" => Ok(Self::Oct),
            other => Err(BundleError::unsupported_key(format!("unknown key type '{other}'"))),
        }
    }
}

/// Declared key use (`use`).
///
/// A key without a declared use may serve either purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Signing and signature verification.
    Sig,
    /// Encryption and decryption.
    Enc,
}

impl KeyUse {
    /// The `use` value as it appears in a JWK.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sig => "sig",
            Self::Enc => "enc",
        }
    }
}

impl fmt::Display for KeyUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUse {
    type Err = BundleError;

    /// Accepts the JWK values and the operation names that imply them
    /// (`ver` → `sig`, `dec` → `enc`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sig" | "ver" => Ok(Self::Sig),
            "enc" | "dec" => Ok(Self::Enc),
            other => Err(BundleError::unsupported_key(format!("unknown key use '{other}'"))),
        }
    }
}

/// Deduplicates usages while keeping their first-seen order.
#[must_use]
pub fn harmonize_usage(usages: &[KeyUse]) -> Vec<KeyUse> {
    let mut out = Vec::with_capacity(usages.len());
    for usage in usages {
        if !out.contains(usage) {
            out.push(*usage);
        }
    }
    out
}
