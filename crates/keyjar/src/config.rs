//! Key jar configuration.
//!
//! [`KeyJarConfig`] carries the settings that apply to every bundle a jar
//! creates: TLS policy for remote key sets and the retention window for
//! retired keys. [`KeySpec`] and [`KeySetup`] describe which keys a service
//! should hold for itself; they deserialize from the same configuration
//! files, e.g.
//!
//! ```yaml
//! keys:
//!   private_path: /etc/op/private/jwks.json
//!   public_path: /var/www/static/jwks.json
//!   key_defs:
//!     - { type: RSA, key: /etc/op/keys/key.pem, use: [sig] }
//!     - { type: EC, crv: P-256, use: [sig] }
//!     - { type: EC, crv: P-256, use: [enc] }
//! ```

use std::{path::PathBuf, time::Duration};

use oidc_keyjar_bundle::{BundleOptions, DEFAULT_FETCH_TIMEOUT, KeyType, KeyUse};
use serde::{Deserialize, Serialize};

use crate::error::{KeyJarError, KeyJarResult};

/// Default retention for keys after they were marked inactive (1 hour).
pub const DEFAULT_REMOVE_AFTER: Duration = Duration::from_secs(3600);

/// Settings shared by all bundles of a [`KeyJar`](crate::KeyJar).
///
/// Deserialized configurations go through the same validation as the
/// builder.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use oidc_keyjar::KeyJarConfig;
///
/// let config = KeyJarConfig::builder()
///     .remove_after(Duration::from_secs(600))
///     .fetch_timeout(Duration::from_secs(5))
///     .build()?;
/// assert!(config.verify_ssl());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "KeyJarConfigFile")]
pub struct KeyJarConfig {
    /// Validate certificates of remote JWKS endpoints.
    pub(crate) verify_ssl: bool,

    /// Extra PEM root certificates for remote JWKS endpoints.
    pub(crate) ca_certs: Option<PathBuf>,

    /// How long an inactive key is kept before it is purged.
    #[serde(with = "humantime_serde")]
    pub(crate) remove_after: Duration,

    /// Per-request timeout for remote JWKS fetches.
    #[serde(with = "humantime_serde")]
    pub(crate) fetch_timeout: Duration,
}

/// Wire form of [`KeyJarConfig`], checked by [`KeyJarConfig::new`].
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyJarConfigFile {
    #[serde(default = "default_verify_ssl")]
    verify_ssl: bool,
    #[serde(default)]
    ca_certs: Option<PathBuf>,
    #[serde(with = "humantime_serde", default = "default_remove_after")]
    remove_after: Duration,
    #[serde(with = "humantime_serde", default = "default_fetch_timeout")]
    fetch_timeout: Duration,
}

impl TryFrom<KeyJarConfigFile> for KeyJarConfig {
    type Error = KeyJarError;

    fn try_from(file: KeyJarConfigFile) -> KeyJarResult<Self> {
        Self::builder()
            .verify_ssl(file.verify_ssl)
            .maybe_ca_certs(file.ca_certs)
            .remove_after(file.remove_after)
            .fetch_timeout(file.fetch_timeout)
            .build()
    }
}

fn default_verify_ssl() -> bool {
    true
}

fn default_remove_after() -> Duration {
    DEFAULT_REMOVE_AFTER
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

impl Default for KeyJarConfig {
    fn default() -> Self {
        Self {
            verify_ssl: default_verify_ssl(),
            ca_certs: None,
            remove_after: default_remove_after(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

#[bon::bon]
impl KeyJarConfig {
    /// Creates a new configuration.
    ///
    /// # Optional Fields
    ///
    /// * `verify_ssl` - Validate remote certificates (default: true).
    /// * `ca_certs` - PEM file with extra root certificates.
    /// * `remove_after` - Retention of inactive keys (default: 1 hour).
    /// * `fetch_timeout` - Remote fetch timeout (default: 10 seconds).
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::Configuration`] if `fetch_timeout` is zero.
    #[builder]
    pub fn new(
        #[builder(default = true)] verify_ssl: bool,
        #[builder(into)] ca_certs: Option<PathBuf>,
        #[builder(default = DEFAULT_REMOVE_AFTER)] remove_after: Duration,
        #[builder(default = DEFAULT_FETCH_TIMEOUT)] fetch_timeout: Duration,
    ) -> KeyJarResult<Self> {
        if fetch_timeout.is_zero() {
            return Err(KeyJarError::configuration("fetch_timeout must be greater than zero"));
        }

        Ok(Self { verify_ssl, ca_certs, remove_after, fetch_timeout })
    }

    /// Returns whether remote certificates are validated.
    #[must_use]
    pub fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    /// Returns the extra root certificate file, if any.
    #[must_use]
    pub fn ca_certs(&self) -> Option<&PathBuf> {
        self.ca_certs.as_ref()
    }

    /// Returns the retention window for inactive keys.
    #[must_use]
    pub fn remove_after(&self) -> Duration {
        self.remove_after
    }

    /// Returns the remote fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Transport options for bundles created from this configuration.
    #[must_use]
    pub fn bundle_options(&self) -> BundleOptions {
        BundleOptions {
            verify_ssl: self.verify_ssl,
            ca_certs: self.ca_certs.clone(),
            timeout: self.fetch_timeout,
        }
    }
}

/// One entry of a key definition list.
///
/// `type` is `RSA` or `EC`. An RSA entry may name a PEM file in `key`; if the
/// file cannot be read, a fresh key is generated instead. `use` lists the
/// usages; one key is created per usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct KeySpec {
    /// Key type.
    #[serde(rename = "type")]
    pub key_type: KeyType,

    /// PEM file holding an RSA private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub key: Option<PathBuf>,

    /// Curve for EC keys (default `P-256`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub crv: Option<String>,

    /// Usages; one key is created for each.
    #[serde(rename = "use", default)]
    #[builder(default)]
    pub usage: Vec<KeyUse>,

    /// RSA modulus size in bits (default 2048).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

impl KeySpec {
    /// A generated RSA key per usage.
    #[must_use]
    pub fn rsa(usage: &[KeyUse]) -> Self {
        Self::builder().key_type(KeyType::Rsa).usage(usage.to_vec()).build()
    }

    /// A generated EC key per usage on `crv`.
    #[must_use]
    pub fn ec(crv: &str, usage: &[KeyUse]) -> Self {
        Self::builder().key_type(KeyType::Ec).crv(crv).usage(usage.to_vec()).build()
    }

    /// Checks that the entry can be turned into keys.
    ///
    /// # Errors
    ///
    /// Returns [`KeyJarError::Configuration`] for symmetric entries, for a
    /// `key` file on anything but RSA and for a `crv` on RSA.
    pub fn validate(&self) -> KeyJarResult<()> {
        match self.key_type {
            KeyType::Rsa if self.crv.is_some() => {
                Err(KeyJarError::configuration("'crv' is not valid for RSA key definitions"))
            },
            KeyType::Ec if self.key.is_some() => {
                Err(KeyJarError::configuration("'key' files are only supported for RSA keys"))
            },
            KeyType::Oct => Err(KeyJarError::configuration(
                "symmetric keys cannot be defined in a key specification",
            )),
            _ => Ok(()),
        }
    }
}

/// Where a service keeps its own keys and how to create them.
///
/// See [`init_key_jar`](crate::init_key_jar) for how the paths are used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeySetup {
    /// File for the public JWKS.
    #[serde(default)]
    pub public_path: Option<PathBuf>,

    /// File for the private JWKS.
    #[serde(default)]
    pub private_path: Option<PathBuf>,

    /// Keys to create when no file can be loaded.
    #[serde(default)]
    pub key_defs: Vec<KeySpec>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = KeyJarConfig::builder().build().unwrap();
        assert_eq!(config, KeyJarConfig::default());
        assert!(config.verify_ssl());
        assert_eq!(config.remove_after(), DEFAULT_REMOVE_AFTER);
        assert_eq!(config.fetch_timeout(), DEFAULT_FETCH_TIMEOUT);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = KeyJarConfig::builder().fetch_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(KeyJarError::Configuration(_))));
    }

    #[test]
    fn test_bundle_options_follow_config() {
        let config = KeyJarConfig::builder()
            .verify_ssl(false)
            .ca_certs("/etc/ssl/extra.pem")
            .fetch_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        let options = config.bundle_options();
        assert!(!options.verify_ssl);
        assert_eq!(options.ca_certs, Some(PathBuf::from("/etc/ssl/extra.pem")));
        assert_eq!(options.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_deserialize_with_humantime() {
        let config: KeyJarConfig =
            serde_json::from_str(r#"{"remove_after": "15m", "fetch_timeout": "2s"}"#).unwrap();
        assert_eq!(config.remove_after(), Duration::from_secs(900));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(2));
        assert!(config.verify_ssl());
    }

    #[test]
    fn test_deserialize_rejects_zero_timeout() {
        let result = serde_json::from_str::<KeyJarConfig>(r#"{"fetch_timeout": "0s"}"#);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("fetch_timeout must be greater than zero"), "{err}");
    }

    #[test]
    fn test_serialized_config_reads_back() {
        let config = KeyJarConfig::builder()
            .verify_ssl(false)
            .remove_after(Duration::from_secs(90))
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<KeyJarConfig>(&json).unwrap(), config);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = serde_json::from_str::<KeyJarConfig>(r#"{"verify": false}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_key_spec_wire_format() {
        let specs: Vec<KeySpec> = serde_json::from_str(
            r#"[
                {"type": "RSA", "key": "keys/key.pem", "use": ["enc", "sig"]},
                {"type": "EC", "crv": "P-256", "use": ["sig"]}
            ]"#,
        )
        .unwrap();
        assert_eq!(specs[0].key_type, KeyType::Rsa);
        assert_eq!(specs[0].key, Some(PathBuf::from("keys/key.pem")));
        assert_eq!(specs[0].usage, vec![KeyUse::Enc, KeyUse::Sig]);
        assert_eq!(specs[1], KeySpec::ec("P-256", &[KeyUse::Sig]));
    }

    #[test]
    fn test_key_spec_validation() {
        assert!(KeySpec::rsa(&[KeyUse::Sig]).validate().is_ok());
        assert!(KeySpec::ec("P-384", &[KeyUse::Enc]).validate().is_ok());

        let symmetric = KeySpec::builder().key_type(KeyType::Oct).build();
        assert!(matches!(symmetric.validate(), Err(KeyJarError::Configuration(_))));

        let ec_with_file = KeySpec::builder().key_type(KeyType::Ec).key("k.pem").build();
        assert!(matches!(ec_with_file.validate(), Err(KeyJarError::Configuration(_))));
    }

    #[test]
    fn test_key_setup_defaults() {
        let setup: KeySetup = serde_json::from_str(r#"{"private_path": "priv/jwks.json"}"#).unwrap();
        assert_eq!(setup.private_path, Some(PathBuf::from("priv/jwks.json")));
        assert!(setup.public_path.is_none());
        assert!(setup.key_defs.is_empty());
    }
}
