//! The key jar: key bundles indexed by owner.
//!
//! An owner is the identity a set of keys belongs to, usually an issuer or
//! client URL. The empty string denotes the jar's own keys.
//!
//! # Invariants
//!
//! - No owner maps to an empty bundle list; removing an owner's last bundle
//!   removes the owner.
//! - Bundles keep insertion order per owner. Lookups return keys in bundle
//!   order, so earlier bundles win when a single key is picked.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use oidc_keyjar_bundle::{
    BundleError, BundleFactory, BundleOptions, DefaultBundleFactory, Jwks, Key, KeyBundle, KeyUse,
    harmonize_usage,
};

use crate::{
    config::KeyJarConfig,
    error::{KeyJarError, KeyJarResult},
};

/// The owner under which the jar keeps its own keys.
pub const OWN_KEYS: &str = "";

fn default_factory() -> Arc<dyn BundleFactory> {
    Arc::new(DefaultBundleFactory)
}

/// Multi-owner key store.
///
/// The jar holds no locks. Lookups take `&self` and mutations `&mut self`;
/// an embedder sharing a jar between tasks wraps it in a reader-writer lock
/// and treats trust extension
/// ([`get_jwt_verify_keys`](Self::get_jwt_verify_keys) with `trusting`) as a
/// write.
///
/// # Example
///
/// ```
/// use oidc_keyjar::{KeyJar, Usage};
/// use oidc_keyjar_bundle::{KeyType, KeyUse};
///
/// let mut jar = KeyJar::default();
/// jar.add_symmetric("https://client.example.com", b"client secret", &[KeyUse::Sig]);
///
/// let keys = jar.lookup(Usage::Verify, Some(KeyType::Oct), "https://client.example.com/", None, None);
/// assert_eq!(keys.len(), 1);
/// ```
pub struct KeyJar {
    pub(crate) owners: HashMap<String, Vec<Box<dyn KeyBundle>>>,
    config: KeyJarConfig,
    factory: Arc<dyn BundleFactory>,
}

impl Default for KeyJar {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon::bon]
impl KeyJar {
    /// Creates an empty key jar.
    ///
    /// # Optional Fields
    ///
    /// * `config` - Transport and retention settings (default: [`KeyJarConfig::default`]).
    /// * `factory` - Creates the bundles the jar builds itself (default: [`DefaultBundleFactory`]).
    #[builder]
    pub fn new(
        #[builder(default)] config: KeyJarConfig,
        #[builder(default = default_factory())] factory: Arc<dyn BundleFactory>,
    ) -> Self {
        Self { owners: HashMap::new(), config, factory }
    }

    /// Returns the jar configuration.
    #[must_use]
    pub fn config(&self) -> &KeyJarConfig {
        &self.config
    }

    /// Returns the bundle factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn BundleFactory> {
        &self.factory
    }

    /// Transport options for `url`: the jar's policy, with certificate
    /// validation disabled for `localhost`.
    #[must_use]
    pub fn bundle_options_for(&self, url: &str) -> BundleOptions {
        let mut options = self.config.bundle_options();
        if url.contains("/localhost:") || url.contains("/localhost/") {
            options.verify_ssl = false;
        }
        options
    }

    /// Registers a remote JWKS for `owner`.
    ///
    /// The bundle is appended; nothing is fetched until it is updated
    /// ([`update_keyjar`](crate::update_keyjar)). Certificate validation
    /// follows [`bundle_options_for`](Self::bundle_options_for).
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::Configuration`] if `url` is empty or not an
    /// absolute HTTP(S) URL.
    pub fn add_url(&mut self, owner: &str, url: &str) -> KeyJarResult<()> {
        let options = self.bundle_options_for(url);
        self.add_url_with_options(owner, url, &options)
    }

    /// Registers a remote JWKS for `owner` with explicit transport options.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::Configuration`] if `url` is empty or the
    /// factory rejects the URL or options.
    pub fn add_url_with_options(
        &mut self,
        owner: &str,
        url: &str,
        options: &BundleOptions,
    ) -> KeyJarResult<()> {
        if url.is_empty() {
            return Err(KeyJarError::configuration(format!("No URL given for owner '{owner}'")));
        }
        let bundle = self.factory.remote(url, options).map_err(|e| match e {
            BundleError::Configuration(message) => KeyJarError::Configuration(message),
            other => KeyJarError::from(other),
        })?;
        tracing::debug!(owner = %owner, url = %url, "Registered remote key set");
        self.add_bundle(owner, bundle);
        Ok(())
    }

    /// Adds a shared secret for `owner`.
    ///
    /// Each distinct usage gets its own bundle holding one key with that
    /// `use`. Without usages a single unrestricted key is added.
    pub fn add_symmetric(&mut self, owner: &str, secret: &[u8], usages: &[KeyUse]) {
        if usages.is_empty() {
            let bundle = self.factory.from_keys(vec![Key::symmetric(secret)]);
            self.add_bundle(owner, bundle);
            return;
        }
        for usage in harmonize_usage(usages) {
            let bundle = self.factory.from_keys(vec![Key::symmetric(secret).with_use(usage)]);
            self.add_bundle(owner, bundle);
        }
    }

    /// Appends a bundle to `owner`'s list, creating the owner if needed.
    pub fn add_bundle(&mut self, owner: &str, bundle: Box<dyn KeyBundle>) {
        self.owners.entry(owner.to_owned()).or_default().push(bundle);
    }

    /// Overwrites `owner`'s bundle list.
    ///
    /// An empty list removes the owner.
    pub fn replace(&mut self, owner: &str, bundles: Vec<Box<dyn KeyBundle>>) {
        if bundles.is_empty() {
            self.owners.remove(owner);
        } else {
            self.owners.insert(owner.to_owned(), bundles);
        }
    }

    /// Removes `owner` and returns its bundles.
    pub fn remove_owner(&mut self, owner: &str) -> Option<Vec<Box<dyn KeyBundle>>> {
        self.owners.remove(owner)
    }

    /// Bundles of `owner`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::NotFound`] if the owner has no bundles.
    pub fn bundles(&self, owner: &str) -> KeyJarResult<&[Box<dyn KeyBundle>]> {
        match self.owners.get(owner) {
            Some(bundles) => Ok(bundles),
            None => {
                tracing::debug!(
                    owner = %owner,
                    known = ?self.owners(),
                    "Owner not found"
                );
                Err(KeyJarError::not_found(owner))
            },
        }
    }

    /// Every key of `owner`, active and inactive, in bundle order.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::NotFound`] if the owner has no bundles.
    pub fn owner_keys(&self, owner: &str) -> KeyJarResult<Vec<&Key>> {
        Ok(self.bundles(owner)?.iter().flat_map(|b| b.keys()).collect())
    }

    /// Whether `owner` has any bundles.
    #[must_use]
    pub fn contains_owner(&self, owner: &str) -> bool {
        self.owners.contains_key(owner)
    }

    /// All owners, sorted.
    #[must_use]
    pub fn owners(&self) -> Vec<&str> {
        let mut owners: Vec<&str> = self.owners.keys().map(String::as_str).collect();
        owners.sort_unstable();
        owners
    }

    /// Owners with their bundles, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Box<dyn KeyBundle>])> {
        self.owners.iter().map(|(owner, bundles)| (owner.as_str(), bundles.as_slice()))
    }

    /// The owner whose identifier is the longest prefix of `url`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::NotFound`] if no owner matches.
    pub fn match_owner(&self, url: &str) -> KeyJarResult<&str> {
        self.owners
            .keys()
            .filter(|owner| !owner.is_empty() && url.starts_with(owner.as_str()))
            .max_by_key(|owner| owner.len())
            .map(String::as_str)
            .ok_or_else(|| KeyJarError::not_found(url))
    }

    /// The bundle of `owner` whose source is `source`.
    #[must_use]
    pub fn find(&self, source: &str, owner: &str) -> Option<&dyn KeyBundle> {
        self.owners
            .get(owner)?
            .iter()
            .find(|bundle| bundle.source() == Some(source))
            .map(|bundle| &**bundle)
    }

    /// Registers the keys named in provider metadata.
    ///
    /// `jwks_uri` is preferred; an inline `jwks` is used only when there is
    /// no URI. With `replace`, the issuer's existing bundles are dropped
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::MalformedData`] if the inline `jwks` is not a
    /// key set, and bundle errors from [`add_url`](Self::add_url).
    #[tracing::instrument(skip(self, provider_info))]
    pub fn load_keys(
        &mut self,
        issuer: &str,
        provider_info: &serde_json::Value,
        replace: bool,
    ) -> KeyJarResult<()> {
        if replace {
            self.owners.remove(issuer);
        }

        if let Some(uri) = provider_info.get("jwks_uri").and_then(serde_json::Value::as_str) {
            return self.add_url(issuer, uri);
        }
        if let Some(jwks) = provider_info.get("jwks") {
            return self.import_jwks(jwks, issuer);
        }
        tracing::debug!(issuer = %issuer, "Provider metadata names no keys");
        Ok(())
    }

    /// The active keys of `owner` as a key set.
    ///
    /// Without `private` only public projections are exported, so symmetric
    /// keys are left out. An unknown owner yields an empty set.
    #[must_use]
    pub fn export_jwks(&self, private: bool, owner: &str) -> Jwks {
        let keys = self
            .owners
            .get(owner)
            .into_iter()
            .flatten()
            .flat_map(|bundle| bundle.keys())
            .filter(|key| key.is_active())
            .filter_map(|key| key.export(private))
            .collect();
        Jwks::new(keys)
    }

    /// [`export_jwks`](Self::export_jwks) as JSON text.
    ///
    /// # Errors
    ///
    /// Returns a bundle error if serialization fails.
    pub fn export_jwks_as_json(&self, private: bool, owner: &str) -> KeyJarResult<String> {
        Ok(self.export_jwks(private, owner).to_json()?)
    }

    /// Appends the keys of a JWKS document as one new bundle for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::MalformedData`] if there is no `keys` array,
    /// and a bundle error if a supported key is malformed.
    pub fn import_jwks(&mut self, jwks: &serde_json::Value, owner: &str) -> KeyJarResult<()> {
        if !jwks.get("keys").is_some_and(serde_json::Value::is_array) {
            return Err(KeyJarError::malformed_data("Not a proper JWKS"));
        }
        let jwks = Jwks::from_value(jwks)?;
        self.import_keys(jwks, owner);
        Ok(())
    }

    /// [`import_jwks`](Self::import_jwks) from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::MalformedData`] if the text is not JSON or not
    /// a key set.
    pub fn import_jwks_as_json(&mut self, json: &str, owner: &str) -> KeyJarResult<()> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| KeyJarError::malformed_data(format!("JWKS is not valid JSON: {e}")))?;
        self.import_jwks(&value, owner)
    }

    /// Appends an already parsed key set as one new bundle for `owner`.
    pub fn import_keys(&mut self, jwks: Jwks, owner: &str) {
        let bundle = self.factory.from_keys(jwks.keys);
        self.add_bundle(owner, bundle);
    }

    /// Purges inactive keys whose retention window has passed.
    ///
    /// Bundles left without keys are dropped, remote ones included, and
    /// owners left without bundles are removed. A remote source that should
    /// outlive a purge must be fetched first with
    /// [`update_keyjar`](crate::update_keyjar).
    #[tracing::instrument(skip(self))]
    pub fn remove_outdated(&mut self, now: DateTime<Utc>) {
        let after = self.config.remove_after;
        self.owners.retain(|owner, bundles| {
            for bundle in bundles.iter_mut() {
                let removed = bundle.remove_outdated(after, now);
                if removed > 0 {
                    tracing::debug!(owner = %owner, removed, "Purged outdated keys");
                }
            }
            bundles.retain(|bundle| !bundle.is_empty());
            !bundles.is_empty()
        });
    }

    /// Marks every key of `owner` inactive as of `now`.
    ///
    /// Returns `false` if the owner is unknown.
    pub fn mark_all_as_inactive(&mut self, owner: &str, now: DateTime<Utc>) -> bool {
        let Some(bundles) = self.owners.get_mut(owner) else {
            return false;
        };
        for bundle in bundles {
            bundle.mark_all_as_inactive(now);
        }
        true
    }

    /// One line per key of `owner`: `kty:use:kid`, prefixed with `*` for
    /// inactive keys, joined by `", "`. Empty for an unknown owner.
    #[must_use]
    pub fn key_summary(&self, owner: &str) -> String {
        let Some(bundles) = self.owners.get(owner) else {
            return String::new();
        };
        bundles
            .iter()
            .flat_map(|bundle| bundle.keys())
            .map(|key| {
                format!(
                    "{}{}:{}:{}",
                    if key.is_active() { "" } else { "*" },
                    key.kty(),
                    key.key_use().map_or("-", |u| u.as_str()),
                    key.kid().unwrap_or("-"),
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// A deep copy: every bundle is copied, configuration and factory are
    /// shared.
    #[must_use]
    pub fn copy(&self) -> Self {
        let owners = self
            .owners
            .iter()
            .map(|(owner, bundles)| (owner.clone(), bundles.iter().map(|b| b.copy()).collect()))
            .collect();
        Self { owners, config: self.config.clone(), factory: Arc::clone(&self.factory) }
    }
}

impl Clone for KeyJar {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Weak equality: the same owners and, per owner, the same number of keys
/// with at least one key in common.
///
/// Two jars can compare equal while holding different keys. Callers that
/// need set equality must compare [`KeyJar::owner_keys`] themselves.
impl PartialEq for KeyJar {
    fn eq(&self, other: &Self) -> bool {
        if self.owners.len() != other.owners.len()
            || !self.owners.keys().all(|owner| other.owners.contains_key(owner))
        {
            return false;
        }

        self.owners.keys().all(|owner| {
            let mine: Vec<&Key> = self.owners[owner].iter().flat_map(|b| b.keys()).collect();
            let theirs: Vec<&Key> = other.owners[owner].iter().flat_map(|b| b.keys()).collect();
            mine.len() == theirs.len() && mine.iter().any(|key| theirs.contains(key))
        })
    }
}

impl fmt::Debug for KeyJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for owner in self.owners() {
            map.entry(&owner, &self.key_summary(owner));
        }
        map.finish()
    }
}
