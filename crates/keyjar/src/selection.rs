//! Key selection.
//!
//! [`KeyJar::lookup`] filters an owner's keys by usage, key type, `kid` and
//! algorithm. [`KeyJar::add_key`] layers the fallback tiers used when a
//! token does not say which key signed it: a unique candidate is taken, an
//! ambiguous set is taken only when the caller allows it.

use std::{fmt, str::FromStr};

use oidc_keyjar_bundle::{Key, KeyBundle, KeyType, KeyUse};

use crate::{
    error::KeyJarError,
    jwt::ResolutionOptions,
    key_jar::{KeyJar, OWN_KEYS},
    validation::{curve_for_alg, jwe_alg_to_key_type, jws_alg_to_key_type},
};

/// What a selected key will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    /// Producing a signature.
    Sign,
    /// Checking a signature. The only usage that may select inactive keys,
    /// so tokens signed before a rotation still verify.
    Verify,
    /// Encrypting to a recipient.
    Encrypt,
    /// Decrypting.
    Decrypt,
}

impl Usage {
    /// The JWK `use` a key must declare (or leave unset) to qualify.
    #[must_use]
    pub fn key_use(self) -> KeyUse {
        match self {
            Self::Encrypt | Self::Decrypt => KeyUse::Enc,
            Self::Sign | Self::Verify => KeyUse::Sig,
        }
    }

    /// The operation name (`sig`, `ver`, `enc`, `dec`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sign => "sig",
            Self::Verify => "ver",
            Self::Encrypt => "enc",
            Self::Decrypt => "dec",
        }
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Usage {
    type Err = KeyJarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sig" => Ok(Self::Sign),
            "ver" => Ok(Self::Verify),
            "enc" => Ok(Self::Encrypt),
            "dec" => Ok(Self::Decrypt),
            other => Err(KeyJarError::configuration(format!("unknown key usage '{other}'"))),
        }
    }
}

fn merge<'a>(keys: &mut Vec<&'a Key>, found: impl IntoIterator<Item = &'a Key>) {
    for key in found {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
}

impl KeyJar {
    /// Resolves `owner`, retrying with the trailing slash toggled.
    ///
    /// Returns the stored owner name together with its bundles.
    pub(crate) fn resolve_owner(&self, owner: &str) -> Option<(&str, &[Box<dyn KeyBundle>])> {
        let found = |name: &str| {
            self.owners.get_key_value(name).map(|(name, bundles)| (name.as_str(), bundles.as_slice()))
        };

        if let Some(hit) = found(owner) {
            return Some(hit);
        }
        if owner.is_empty() {
            return None;
        }
        match owner.strip_suffix('/') {
            Some(trimmed) => found(trimmed),
            None => found(&format!("{owner}/")),
        }
    }

    /// Keys of `owner` usable for `usage`.
    ///
    /// - A key qualifies if its declared use is unset or matches the usage.
    /// - Inactive keys are skipped unless `usage` is [`Usage::Verify`].
    /// - `key_type` restricts the key type; `None` admits every type.
    /// - With `kid`, each bundle contributes at most its first key with that
    ///   identifier.
    /// - For EC keys and an `ES*` algorithm, only keys on the matching curve
    ///   are kept.
    /// - Symmetric encryption keys of a peer are followed by the jar's own
    ///   active symmetric keys usable for encryption.
    ///
    /// An owner that is not found, even with the trailing slash toggled,
    /// yields an empty list.
    #[must_use]
    pub fn lookup(
        &self,
        usage: Usage,
        key_type: Option<KeyType>,
        owner: &str,
        kid: Option<&str>,
        alg: Option<&str>,
    ) -> Vec<&Key> {
        let Some((_, bundles)) = self.resolve_owner(owner) else {
            return Vec::new();
        };
        let use_class = usage.key_use();

        let mut found = Vec::new();
        for bundle in bundles {
            let candidates =
                bundle.keys().iter().filter(|key| key_type.is_none_or(|t| key.kty() == t));
            for key in candidates {
                if !key.is_active() && usage != Usage::Verify {
                    continue;
                }
                if !key.key_use().is_none_or(|u| u == use_class) {
                    continue;
                }
                match kid {
                    Some(kid) if key.kid() == Some(kid) => {
                        found.push(key);
                        break;
                    },
                    Some(_) => {},
                    None => found.push(key),
                }
            }
        }

        if key_type == Some(KeyType::Ec)
            && let Some(crv) = alg.and_then(curve_for_alg)
        {
            found.retain(|key| key.crv() == Some(crv));
        }

        if use_class == KeyUse::Enc && key_type == Some(KeyType::Oct) && !owner.is_empty() {
            let own = self.owners.get(OWN_KEYS).into_iter().flatten().flat_map(|b| b.keys());
            found.extend(own.filter(|key| {
                key.kty() == KeyType::Oct
                    && key.is_active()
                    && key.key_use().is_none_or(|u| u == KeyUse::Enc)
            }));
        }

        found
    }

    /// Keys for producing signatures.
    #[must_use]
    pub fn signing_keys(&self, key_type: Option<KeyType>, owner: &str, kid: Option<&str>) -> Vec<&Key> {
        self.lookup(Usage::Sign, key_type, owner, kid, None)
    }

    /// Keys for checking signatures, inactive ones included.
    #[must_use]
    pub fn verify_keys(&self, key_type: Option<KeyType>, owner: &str, kid: Option<&str>) -> Vec<&Key> {
        self.lookup(Usage::Verify, key_type, owner, kid, None)
    }

    /// Keys for encrypting to `owner`.
    #[must_use]
    pub fn encrypt_keys(&self, key_type: Option<KeyType>, owner: &str, kid: Option<&str>) -> Vec<&Key> {
        self.lookup(Usage::Encrypt, key_type, owner, kid, None)
    }

    /// Keys for decrypting.
    #[must_use]
    pub fn decrypt_keys(&self, key_type: Option<KeyType>, owner: &str, kid: Option<&str>) -> Vec<&Key> {
        self.lookup(Usage::Decrypt, key_type, owner, kid, None)
    }

    /// Keys of `owner` for `usage` with the key type implied by `alg`.
    ///
    /// Signature usages read `alg` as a JWS algorithm, encryption usages as
    /// a JWE key management algorithm. An algorithm that maps to no key type
    /// selects nothing.
    #[must_use]
    pub fn keys_by_alg_and_usage(&self, owner: &str, alg: &str, usage: Usage) -> Vec<&Key> {
        let key_type = match usage {
            Usage::Sign | Usage::Verify => jws_alg_to_key_type(alg),
            Usage::Encrypt | Usage::Decrypt => jwe_alg_to_key_type(alg),
        };
        match key_type {
            Some(key_type) => self.lookup(usage, Some(key_type), owner, None, Some(alg)),
            None => Vec::new(),
        }
    }

    /// Adds the keys of `owner` that a token may have been produced with.
    ///
    /// - With `kid`, every key carrying it is added.
    /// - Without `kid`, a single candidate is added; several are added only
    ///   with `allow_missing_kid`, or when `owner` is listed in
    ///   `no_kid_issuer` (an empty list admits every candidate, otherwise
    ///   only the listed kids). Otherwise nothing is added.
    ///
    /// Keys already in `keys` are not added twice. An unknown owner leaves
    /// `keys` unchanged.
    #[must_use]
    pub fn add_key<'a>(
        &'a self,
        mut keys: Vec<&'a Key>,
        owner: &str,
        usage: Usage,
        key_type: Option<KeyType>,
        kid: Option<&str>,
        options: &ResolutionOptions,
    ) -> Vec<&'a Key> {
        let Some((resolved, _)) = self.resolve_owner(owner) else {
            tracing::error!(owner = %owner, "Owner not in key jar");
            return keys;
        };
        tracing::debug!(owner = %resolved, summary = %self.key_summary(resolved), "Key set summary");

        let found = self.lookup(usage, key_type, owner, kid, None);
        if kid.is_some() {
            merge(&mut keys, found);
            return keys;
        }

        match found.len() {
            0 => {},
            1 => merge(&mut keys, found),
            _ if options.allow_missing_kid => merge(&mut keys, found),
            count => {
                let allowed =
                    options.no_kid_issuer.get(owner).or_else(|| options.no_kid_issuer.get(resolved));
                match allowed {
                    Some(allowed) if allowed.is_empty() => merge(&mut keys, found),
                    Some(allowed) => merge(
                        &mut keys,
                        found.into_iter().filter(|key| {
                            key.kid().is_some_and(|kid| allowed.iter().any(|a| a == kid))
                        }),
                    ),
                    None => {
                        tracing::debug!(
                            owner = %resolved,
                            candidates = count,
                            "No kid and several candidate keys; none selected"
                        );
                    },
                }
            },
        }
        keys
    }
}
