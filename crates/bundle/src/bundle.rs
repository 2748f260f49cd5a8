//! Key bundles: a group of keys that share one origin.
//!
//! A bundle holds the keys that came from a single place: a literal list,
//! a local JWKS or PEM file, or a remote JWKS URL. The key jar never talks to
//! a source directly; it asks each bundle to [`update`](KeyBundle::update)
//! itself and reads the resulting keys.
//!
//! # Rotation
//!
//! When a refresh no longer returns a key the bundle held before, that key is
//! not dropped. It is marked inactive with the refresh time and kept, so
//! tokens signed just before a rotation still verify. A later
//! [`remove_outdated`](KeyBundle::remove_outdated) purges keys whose
//! retention window has passed.
//!
//! ```text
//! ┌──────────┐  update(): key missing   ┌────────────┐  remove_outdated():   ┌────────┐
//! │  Active  │ ───────────────────────► │  Inactive  │ ────────────────────► │ Purged │
//! └──────────┘                          │ (since t)  │  t + after < now      └────────┘
//!                                       └────────────┘
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;

use crate::{
    error::{BundleError, BundleResult},
    generate::rsa_key_from_pem,
    key::{Jwks, Key},
    remote::{self, DEFAULT_FETCH_TIMEOUT, Fetched},
    types::{KeyType, KeyUse, harmonize_usage},
};

/// A group of keys with a common origin.
///
/// Implementations must be cheap to read: the key jar calls
/// [`keys`](Self::keys) on every lookup. Only [`update`](Self::update) may
/// perform I/O.
#[async_trait]
pub trait KeyBundle: Send + Sync + fmt::Debug {
    /// All keys, active and inactive, in load order.
    fn keys(&self) -> &[Key];

    /// Mutable access to the keys, for lifecycle changes that keep the set.
    fn keys_mut(&mut self) -> &mut [Key];

    /// Adds a key to the bundle.
    fn append(&mut self, key: Key);

    /// Where the keys come from: the URL or file path, `None` for literal keys.
    fn source(&self) -> Option<&str>;

    /// Whether the keys are fetched over the network.
    fn is_remote(&self) -> bool {
        false
    }

    /// Keys of the given type, in load order.
    fn get(&self, key_type: KeyType) -> Vec<&Key> {
        self.keys().iter().filter(|k| k.kty() == key_type).collect()
    }

    /// First key carrying `kid`.
    fn get_key_with_kid(&self, kid: &str) -> Option<&Key> {
        self.keys().iter().find(|k| k.kid() == Some(kid))
    }

    /// Identifiers of all keys that have one.
    fn kids(&self) -> Vec<&str> {
        self.keys().iter().filter_map(Key::kid).collect()
    }

    /// Number of keys.
    fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether the bundle holds no keys.
    fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Marks every key inactive as of `now`.
    fn mark_all_as_inactive(&mut self, now: DateTime<Utc>) {
        for key in self.keys_mut() {
            key.mark_inactive(now);
        }
    }

    /// Marks the key carrying `kid` inactive. Returns whether one was found.
    fn mark_as_inactive(&mut self, kid: &str, now: DateTime<Utc>) -> bool {
        let mut found = false;
        for key in self.keys_mut().iter_mut().filter(|k| k.kid() == Some(kid)) {
            key.mark_inactive(now);
            found = true;
        }
        found
    }

    /// Drops inactive keys whose retention window ended before `now`.
    ///
    /// A key inactive since `t` is dropped when `t + after < now`. Returns
    /// the number of keys removed.
    fn remove_outdated(&mut self, after: Duration, now: DateTime<Utc>) -> usize;

    /// An independent copy of this bundle.
    fn copy(&self) -> Box<dyn KeyBundle>;

    /// The bundle as a key set, public projections unless `private`.
    fn to_jwks(&self, private: bool) -> Jwks {
        Jwks::new(self.keys().iter().filter_map(|k| k.export(private)).collect())
    }

    /// [`to_jwks`](Self::to_jwks) as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Deserialization`] if serialization fails.
    fn to_jwks_json(&self, private: bool) -> BundleResult<String> {
        self.to_jwks(private).to_json()
    }

    /// Reloads the keys from the source.
    ///
    /// Keys the source no longer lists are kept but marked inactive. On
    /// failure the bundle is left exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns a remote error ([`BundleError::is_remote`]) when a remote
    /// source could not be fetched, and an I/O or decoding error when a local
    /// source could not be read.
    async fn update(&mut self) -> BundleResult<()>;
}

/// Where a [`Bundle`] gets its keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
    /// Keys supplied directly; updating is a no-op.
    Literal,
    /// A JWKS document on disk.
    JwksFile(PathBuf),
    /// An RSA private key in PEM form, loaded once per usage.
    PemFile {
        /// The PEM file.
        path: PathBuf,
        /// One key is created for each usage.
        usages: Vec<KeyUse>,
    },
    /// A JWKS document served over HTTP(S).
    Remote(String),
}

/// Transport options for remote bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOptions {
    /// Validate the server certificate.
    pub verify_ssl: bool,
    /// Extra PEM root certificates to trust.
    pub ca_certs: Option<PathBuf>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self { verify_ssl: true, ca_certs: None, timeout: DEFAULT_FETCH_TIMEOUT }
    }
}

/// The standard [`KeyBundle`] implementation.
///
/// # Example
///
/// ```
/// use oidc_keyjar_bundle::{Bundle, Key, KeyBundle, KeyType};
///
/// let bundle = Bundle::from_keys(vec![Key::symmetric(b"secret").with_kid("a")]);
/// assert_eq!(bundle.get(KeyType::Oct).len(), 1);
/// assert!(bundle.source().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Bundle {
    keys: Vec<Key>,
    source: BundleSource,
    client: Option<Client>,
    etag: Option<String>,
    last_updated: Option<DateTime<Utc>>,
}

impl Bundle {
    fn with_source(source: BundleSource, keys: Vec<Key>) -> Self {
        Self { keys, source, client: None, etag: None, last_updated: None }
    }

    /// A bundle of literal keys.
    #[must_use]
    pub fn from_keys(keys: Vec<Key>) -> Self {
        Self::with_source(BundleSource::Literal, keys)
    }

    /// A bundle holding the keys of a parsed key set.
    #[must_use]
    pub fn from_jwks(jwks: Jwks) -> Self {
        Self::from_keys(jwks.keys)
    }

    /// A bundle backed by a JWKS file, loaded immediately.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Io`] or [`BundleError::Deserialization`] if the
    /// file cannot be read or parsed.
    pub fn from_jwks_file(path: impl Into<PathBuf>) -> BundleResult<Self> {
        let path = path.into();
        let keys = load_jwks_file(&path)?;
        Ok(Self::with_source(BundleSource::JwksFile(path), keys))
    }

    /// A bundle backed by an RSA private key PEM file, loaded immediately.
    ///
    /// The bundle holds one key per distinct usage, each tagged with it.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Io`] or [`BundleError::Deserialization`] if the
    /// file cannot be read or parsed.
    pub fn from_pem_file(path: impl Into<PathBuf>, usages: &[KeyUse]) -> BundleResult<Self> {
        let path = path.into();
        let usages = harmonize_usage(usages);
        let keys = load_pem_file(&path, &usages)?;
        Ok(Self::with_source(BundleSource::PemFile { path, usages }, keys))
    }

    /// A bundle backed by a remote JWKS URL.
    ///
    /// Nothing is fetched until [`update`](KeyBundle::update) is called.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Configuration`] if the URL is not HTTP(S) or
    /// the HTTP client cannot be built from `options`.
    pub fn remote(url: impl Into<String>, options: &BundleOptions) -> BundleResult<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| BundleError::configuration(format!("invalid JWKS URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BundleError::configuration(format!(
                "JWKS URL '{url}' must use http or https"
            )));
        }

        let client =
            remote::build_client(options.verify_ssl, options.ca_certs.as_deref(), options.timeout)?;
        let mut bundle = Self::with_source(BundleSource::Remote(url), Vec::new());
        bundle.client = Some(client);
        Ok(bundle)
    }

    /// The configured source.
    #[must_use]
    pub fn bundle_source(&self) -> &BundleSource {
        &self.source
    }

    /// When the keys were last successfully refreshed.
    #[must_use]
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    fn replace_keys(&mut self, fresh: Vec<Key>, now: DateTime<Utc>) {
        let old = std::mem::replace(&mut self.keys, fresh);
        let mut retired = 0usize;
        for mut key in old {
            if !self.keys.contains(&key) {
                key.mark_inactive(now);
                self.keys.push(key);
                retired += 1;
            }
        }
        if retired > 0 {
            tracing::info!(
                source = %self.source().unwrap_or("literal"),
                retired,
                "Keys no longer published by source marked inactive"
            );
        }
    }
}

fn load_jwks_file(path: &Path) -> BundleResult<Vec<Key>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| BundleError::io(path.display().to_string(), e))?;
    Ok(Jwks::from_json(&text)?.keys)
}

fn load_pem_file(path: &Path, usages: &[KeyUse]) -> BundleResult<Vec<Key>> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| BundleError::io(path.display().to_string(), e))?;
    let key = rsa_key_from_pem(&pem)?;
    if usages.is_empty() {
        return Ok(vec![key]);
    }
    Ok(usages.iter().map(|usage| key.clone().with_use(*usage)).collect())
}

#[async_trait]
impl KeyBundle for Bundle {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn keys_mut(&mut self) -> &mut [Key] {
        &mut self.keys
    }

    fn append(&mut self, key: Key) {
        self.keys.push(key);
    }

    fn source(&self) -> Option<&str> {
        match &self.source {
            BundleSource::Literal => None,
            BundleSource::JwksFile(path) | BundleSource::PemFile { path, .. } => path.to_str(),
            BundleSource::Remote(url) => Some(url.as_str()),
        }
    }

    fn is_remote(&self) -> bool {
        matches!(self.source, BundleSource::Remote(_))
    }

    fn remove_outdated(&mut self, after: Duration, now: DateTime<Utc>) -> usize {
        let window = TimeDelta::from_std(after).unwrap_or(TimeDelta::MAX);
        let before = self.keys.len();
        self.keys.retain(|key| match key.inactive_since() {
            // Overflowing the window means it never ends.
            Some(since) => since.checked_add_signed(window).is_none_or(|end| end >= now),
            None => true,
        });
        before - self.keys.len()
    }

    fn copy(&self) -> Box<dyn KeyBundle> {
        Box::new(self.clone())
    }

    #[tracing::instrument(skip(self))]
    async fn update(&mut self) -> BundleResult<()> {
        let now = Utc::now();
        let fresh = match &self.source {
            BundleSource::Literal => return Ok(()),
            BundleSource::JwksFile(path) => load_jwks_file(path)?,
            BundleSource::PemFile { path, usages } => load_pem_file(path, usages)?,
            BundleSource::Remote(url) => {
                let Some(client) = &self.client else {
                    return Err(BundleError::configuration("remote bundle has no HTTP client"));
                };
                match remote::fetch_jwks(client, url, self.etag.as_deref()).await? {
                    Fetched::NotModified => {
                        self.last_updated = Some(now);
                        return Ok(());
                    },
                    Fetched::Jwks { jwks, etag } => {
                        self.etag = etag;
                        jwks.keys
                    },
                }
            },
        };

        self.replace_keys(fresh, now);
        self.last_updated = Some(now);
        Ok(())
    }
}

/// Creates bundles for the key jar.
///
/// The key jar holds one factory and routes every bundle it creates on its
/// own (remote URLs, freshly added keys) through it, so embedders can swap
/// in a bundle type with different caching or transport.
pub trait BundleFactory: Send + Sync + fmt::Debug {
    /// A bundle that will fetch `url` on update.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Configuration`] if the URL or options are unusable.
    fn remote(&self, url: &str, options: &BundleOptions) -> BundleResult<Box<dyn KeyBundle>>;

    /// A bundle of literal keys.
    fn from_keys(&self, keys: Vec<Key>) -> Box<dyn KeyBundle>;
}

/// Factory producing [`Bundle`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBundleFactory;

impl BundleFactory for DefaultBundleFactory {
    fn remote(&self, url: &str, options: &BundleOptions) -> BundleResult<Box<dyn KeyBundle>> {
        Ok(Box::new(Bundle::remote(url, options)?))
    }

    fn from_keys(&self, keys: Vec<Key>) -> Box<dyn KeyBundle> {
        Box::new(Bundle::from_keys(keys))
    }
}
