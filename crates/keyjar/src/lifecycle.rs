//! Creating, persisting and refreshing a service's keys.

use std::path::Path;

use chrono::Utc;
use oidc_keyjar_bundle::{
    Bundle, BundleError, DEFAULT_EC_CURVE, DEFAULT_RSA_KEY_SIZE, Key, KeyBundle, KeyType, KeyUse,
    harmonize_usage, new_ec_key, new_rsa_key,
};

use crate::{
    config::{KeySetup, KeySpec},
    error::{KeyJarError, KeyJarResult},
    key_jar::{KeyJar, OWN_KEYS},
};

/// Usages to create keys for; no declared usage yields one unrestricted key.
fn usages_of(spec: &KeySpec) -> Vec<Option<KeyUse>> {
    if spec.usage.is_empty() {
        vec![None]
    } else {
        harmonize_usage(&spec.usage).into_iter().map(Some).collect()
    }
}

fn generate(spec: &KeySpec) -> KeyJarResult<Vec<Key>> {
    let mut keys = Vec::new();
    for usage in usages_of(spec) {
        let key = match spec.key_type {
            KeyType::Rsa => new_rsa_key(spec.size.unwrap_or(DEFAULT_RSA_KEY_SIZE))?,
            KeyType::Ec => new_ec_key(spec.crv.as_deref().unwrap_or(DEFAULT_EC_CURVE))?,
            KeyType::Oct => {
                return Err(KeyJarError::configuration(
                    "symmetric keys cannot be defined in a key specification",
                ));
            },
        };
        keys.push(match usage {
            Some(usage) => key.with_use(usage),
            None => key,
        });
    }
    Ok(keys)
}

fn load_or_generate_rsa(spec: &KeySpec, path: &Path) -> KeyJarResult<Vec<Key>> {
    match Bundle::from_pem_file(path, &spec.usage) {
        Ok(bundle) if !bundle.is_empty() => Ok(bundle.keys().to_vec()),
        Ok(_) => generate(spec),
        Err(e @ (BundleError::Io { .. } | BundleError::Deserialization { .. })) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not load RSA key, generating a new one"
            );
            generate(spec)
        },
        Err(e) => Err(e.into()),
    }
}

/// Assigns kids: `{}` in the template is replaced by a running counter;
/// without a template each key gets its RFC 7638 thumbprint.
struct KidAssigner<'a> {
    template: Option<&'a str>,
    next: usize,
}

impl<'a> KidAssigner<'a> {
    fn new(template: Option<&'a str>) -> KeyJarResult<Self> {
        if let Some(template) = template
            && !template.contains("{}")
        {
            return Err(KeyJarError::configuration(format!(
                "kid template '{template}' must contain '{{}}'"
            )));
        }
        Ok(Self { template, next: 0 })
    }

    fn assign(&mut self, key: &mut Key) {
        match self.template {
            Some(template) => {
                key.set_kid(template.replace("{}", &self.next.to_string()));
                self.next += 1;
            },
            None => key.add_kid(),
        }
    }
}

/// Builds the key groups described by `specs`, one per entry.
fn build_keys(specs: &[KeySpec], kid_template: Option<&str>) -> KeyJarResult<Vec<Vec<Key>>> {
    let mut kids = KidAssigner::new(kid_template)?;
    let mut groups = Vec::with_capacity(specs.len());

    for spec in specs {
        spec.validate()?;
        let mut keys = match (&spec.key_type, &spec.key) {
            (KeyType::Rsa, Some(path)) => load_or_generate_rsa(spec, path)?,
            _ => generate(spec)?,
        };
        for key in &mut keys {
            kids.assign(key);
        }
        groups.push(keys);
    }
    Ok(groups)
}

fn add_own_groups(jar: &mut KeyJar, groups: Vec<Vec<Key>>) {
    for keys in groups {
        let bundle = jar.factory().from_keys(keys);
        jar.add_bundle(OWN_KEYS, bundle);
    }
}

/// Creates the keys described by `specs` and adds them to `jar` (or a new
/// jar) as the jar's own keys, one bundle per entry.
///
/// An RSA entry naming a `key` file loads that PEM file; if it cannot be
/// read or parsed a new key is generated instead. Every key gets a `kid`,
/// either from `kid_template` (`{}` replaced by a counter starting at 0) or
/// its RFC 7638 thumbprint.
///
/// # Errors
///
/// Returns [`KeyJarError::Configuration`] for an invalid entry or a
/// template without `{}`, and a bundle error if key generation fails.
///
/// # Example
///
/// ```
/// use oidc_keyjar::{KeySpec, OWN_KEYS, build_keyjar};
/// use oidc_keyjar_bundle::KeyUse;
///
/// let jar = build_keyjar(&[KeySpec::ec("P-256", &[KeyUse::Sig, KeyUse::Enc])], Some("key-{}"), None)?;
/// assert_eq!(jar.key_summary(OWN_KEYS), "EC:sig:key-0, EC:enc:key-1");
/// # Ok::<(), oidc_keyjar::KeyJarError>(())
/// ```
#[tracing::instrument(skip(specs, jar), fields(entries = specs.len()))]
pub fn build_keyjar(
    specs: &[KeySpec],
    kid_template: Option<&str>,
    jar: Option<KeyJar>,
) -> KeyJarResult<KeyJar> {
    let groups = build_keys(specs, kid_template)?;
    let mut jar = jar.unwrap_or_default();
    add_own_groups(&mut jar, groups);
    Ok(jar)
}

/// Retires the jar's current own keys and adds fresh ones built from
/// `specs`.
///
/// The new keys are built before anything is retired, so a failed build
/// leaves the jar as it was. Retired keys remain available for verification
/// until [`KeyJar::remove_outdated`] purges them.
///
/// # Errors
///
/// Same as [`build_keyjar`].
#[tracing::instrument(skip(jar, specs))]
pub fn rotate_keys(jar: &mut KeyJar, specs: &[KeySpec], kid_template: Option<&str>) -> KeyJarResult<()> {
    let groups = build_keys(specs, kid_template)?;
    jar.mark_all_as_inactive(OWN_KEYS, Utc::now());
    add_own_groups(jar, groups);
    tracing::info!(summary = %jar.key_summary(OWN_KEYS), "Rotated own keys");
    Ok(())
}

fn read_jwks(path: &Path) -> KeyJarResult<KeyJar> {
    let text =
        std::fs::read_to_string(path).map_err(|e| KeyJarError::io(path.display().to_string(), e))?;
    let mut jar = KeyJar::default();
    jar.import_jwks_as_json(&text, OWN_KEYS)?;
    Ok(jar)
}

fn write_jwks(jar: &KeyJar, path: &Path, private: bool) -> KeyJarResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| KeyJarError::io(parent.display().to_string(), e))?;
    }
    let json = jar.export_jwks_as_json(private, OWN_KEYS)?;
    std::fs::write(path, json).map_err(|e| KeyJarError::io(path.display().to_string(), e))?;
    tracing::debug!(path = %path.display(), private, "Wrote JWKS");
    Ok(())
}

/// Loads or creates a service's own keys.
///
/// - With `private_path`: an existing file is loaded; otherwise keys are
///   built from `specs` and written there. If `public_path` is also given,
///   the public JWKS is (re)written to it in either case.
/// - With only `public_path`: an existing file is loaded; otherwise keys are
///   built and their public JWKS written there.
/// - With neither, keys are built in memory.
///
/// Missing parent directories are created. Keys end up under [`OWN_KEYS`].
///
/// # Errors
///
/// Returns [`KeyJarError::Io`] if a file cannot be read or written,
/// [`KeyJarError::MalformedData`] if an existing file is not a JWKS, and the
/// errors of [`build_keyjar`].
#[tracing::instrument(skip(specs))]
pub fn init_key_jar(
    public_path: Option<&Path>,
    private_path: Option<&Path>,
    specs: &[KeySpec],
) -> KeyJarResult<KeyJar> {
    if let Some(private_path) = private_path {
        let jar = if private_path.is_file() {
            tracing::info!(path = %private_path.display(), "Loading private keys");
            read_jwks(private_path)?
        } else {
            let jar = build_keyjar(specs, None, None)?;
            write_jwks(&jar, private_path, true)?;
            tracing::info!(path = %private_path.display(), "Created private keys");
            jar
        };
        if let Some(public_path) = public_path {
            write_jwks(&jar, public_path, false)?;
        }
        return Ok(jar);
    }

    if let Some(public_path) = public_path {
        if public_path.is_file() {
            tracing::info!(path = %public_path.display(), "Loading public keys");
            return read_jwks(public_path);
        }
        let jar = build_keyjar(specs, None, None)?;
        write_jwks(&jar, public_path, false)?;
        tracing::info!(path = %public_path.display(), "Created keys, published public part");
        return Ok(jar);
    }

    build_keyjar(specs, None, None)
}

impl KeySetup {
    /// Runs [`init_key_jar`] with this setup.
    ///
    /// # Errors
    ///
    /// Same as [`init_key_jar`].
    pub fn init(&self) -> KeyJarResult<KeyJar> {
        init_key_jar(self.public_path.as_deref(), self.private_path.as_deref(), &self.key_defs)
    }
}

/// Copies the public projection of `origin`'s active keys in `source` into
/// `target` (or a new jar) under `receiver`.
///
/// Symmetric keys have no public projection and are not copied. Nothing is
/// added when `origin` has no exportable keys.
#[must_use]
pub fn public_keys_keyjar(
    source: &KeyJar,
    origin: &str,
    target: Option<KeyJar>,
    receiver: &str,
) -> KeyJar {
    let mut target = target.unwrap_or_default();
    let jwks = source.export_jwks(false, origin);
    if !jwks.is_empty() {
        target.import_keys(jwks, receiver);
    }
    target
}

/// Refreshes every bundle of `jar` from its source.
///
/// Literal bundles are left alone. Owners are visited in sorted order and
/// every bundle is attempted even when an earlier one fails; each failure is
/// logged and the first one is returned.
///
/// # Errors
///
/// Returns [`KeyJarError::RemoteUpdate`] for a remote source that answered
/// badly or could not be reached, and [`KeyJarError::Bundle`] for a local
/// source that could not be read.
#[tracing::instrument(skip(jar))]
pub async fn update_keyjar(jar: &mut KeyJar) -> KeyJarResult<()> {
    let mut first_error = None;
    let owners: Vec<String> = jar.owners().into_iter().map(str::to_owned).collect();
    for owner in owners {
        let Some(bundles) = jar.owners.get_mut(&owner) else {
            continue;
        };
        for bundle in bundles.iter_mut() {
            if let Err(e) = bundle.update().await {
                tracing::error!(
                    owner = %owner,
                    source = %bundle.source().unwrap_or("literal"),
                    error = %e,
                    "Key bundle update failed"
                );
                if first_error.is_none() {
                    first_error = Some(if e.is_remote() {
                        KeyJarError::remote_update(owner.clone(), e)
                    } else {
                        KeyJarError::Bundle(e)
                    });
                }
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::path::PathBuf;

    use oidc_keyjar_bundle::testutil::kids;

    use super::*;

    #[test]
    fn test_build_one_key_per_usage() {
        let specs = [KeySpec::ec("P-256", &[KeyUse::Sig, KeyUse::Enc]), KeySpec::ec("P-384", &[KeyUse::Sig])];
        let jar = build_keyjar(&specs, None, None).unwrap();

        assert_eq!(jar.bundles(OWN_KEYS).unwrap().len(), 2);
        let keys = jar.owner_keys(OWN_KEYS).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[2].crv(), Some("P-384"));
        for key in &keys {
            assert_eq!(key.kid(), Some(key.thumbprint().as_str()));
        }
        assert_ne!(keys[0], keys[1], "each usage gets its own key");
    }

    #[test]
    fn test_kid_template_counts_across_entries() {
        let specs = [KeySpec::ec("P-256", &[KeyUse::Sig]), KeySpec::ec("P-256", &[KeyUse::Enc])];
        let jar = build_keyjar(&specs, Some("own-{}"), None).unwrap();
        assert_eq!(kids(jar.owner_keys(OWN_KEYS).unwrap()), vec!["own-0", "own-1"]);
    }

    #[test]
    fn test_kid_template_needs_placeholder() {
        let result = build_keyjar(&[KeySpec::ec("P-256", &[KeyUse::Sig])], Some("fixed"), None);
        assert!(matches!(result, Err(KeyJarError::Configuration(_))));
    }

    #[test]
    fn test_unusable_rsa_file_falls_back_to_generation() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.pem");
        std::fs::write(&garbage, "not a key").unwrap();

        let specs = [
            KeySpec::builder()
                .key_type(KeyType::Rsa)
                .key(dir.path().join("missing.pem"))
                .usage(vec![KeyUse::Sig])
                .size(1024)
                .build(),
            KeySpec::builder().key_type(KeyType::Rsa).key(garbage).usage(vec![KeyUse::Enc]).size(1024).build(),
        ];
        let jar = build_keyjar(&specs, None, None).unwrap();
        let keys = jar.owner_keys(OWN_KEYS).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.kty() == KeyType::Rsa && k.is_private_key()));
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let spec = KeySpec::builder().key_type(KeyType::Oct).usage(vec![KeyUse::Sig]).build();
        assert!(matches!(build_keyjar(&[spec], None, None), Err(KeyJarError::Configuration(_))));
    }

    #[test]
    fn test_build_into_existing_jar() {
        let mut jar = KeyJar::default();
        jar.add_symmetric("peer", b"secret", &[]);
        let jar = build_keyjar(&[KeySpec::ec("P-256", &[KeyUse::Sig])], None, Some(jar)).unwrap();
        assert!(jar.contains_owner("peer"));
        assert!(jar.contains_owner(OWN_KEYS));
    }

    #[test]
    fn test_rotate_keys_retires_old_keys() {
        let specs = [KeySpec::ec("P-256", &[KeyUse::Sig])];
        let mut jar = build_keyjar(&specs, None, None).unwrap();
        let old_kid = jar.owner_keys(OWN_KEYS).unwrap()[0].kid().unwrap().to_owned();

        rotate_keys(&mut jar, &specs, None).unwrap();

        let signing = jar.signing_keys(None, OWN_KEYS, None);
        assert_eq!(signing.len(), 1);
        assert_ne!(signing[0].kid(), Some(old_kid.as_str()));
        assert_eq!(jar.verify_keys(None, OWN_KEYS, None).len(), 2);
        assert_eq!(jar.export_jwks(false, OWN_KEYS).len(), 1);
    }

    #[test]
    fn test_init_in_memory() {
        let jar = init_key_jar(None, None, &[KeySpec::ec("P-256", &[KeyUse::Sig])]).unwrap();
        assert_eq!(jar.owner_keys(OWN_KEYS).unwrap().len(), 1);
    }

    #[test]
    fn test_key_setup_init_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let setup = KeySetup {
            public_path: Some(dir.path().join("public/nested/jwks.json")),
            private_path: None,
            key_defs: vec![KeySpec::ec("P-256", &[KeyUse::Sig])],
        };
        let jar = setup.init().unwrap();
        let public: PathBuf = setup.public_path.clone().unwrap();
        assert!(public.is_file());
        assert_eq!(jar.owner_keys(OWN_KEYS).unwrap().len(), 1);
    }

    #[test]
    fn test_public_keys_keyjar_copies_public_projection() {
        let mut source =
            build_keyjar(&[KeySpec::ec("P-256", &[KeyUse::Sig])], Some("k{}"), None).unwrap();
        source.add_symmetric(OWN_KEYS, b"secret", &[KeyUse::Sig]);

        let target = public_keys_keyjar(&source, OWN_KEYS, None, "client1");
        let keys = target.owner_keys("client1").unwrap();
        assert_eq!(kids(keys.iter().copied()), vec!["k0"]);
        assert!(!keys[0].is_private_key());

        let empty = public_keys_keyjar(&source, "nobody", None, "client2");
        assert!(!empty.contains_owner("client2"));
    }

    #[tokio::test]
    async fn test_update_literal_bundles_is_noop() {
        let mut jar = build_keyjar(&[KeySpec::ec("P-256", &[KeyUse::Sig])], None, None).unwrap();
        update_keyjar(&mut jar).await.unwrap();
        assert_eq!(jar.owner_keys(OWN_KEYS).unwrap().len(), 1);
    }
}
