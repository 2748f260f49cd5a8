//! Key jar error types.
//!
//! Expected absence is not an error here: a lookup against an unknown owner
//! returns an empty list, and an ambiguous key choice returns no key. The
//! variants below are reserved for invalid input, strict owner access and
//! sources that failed to load.

use oidc_keyjar_bundle::BundleError;
use thiserror::Error;

/// Errors raised by the key jar and its lifecycle helpers.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`, so new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyJarError {
    /// Invalid configuration: missing URL, malformed key specification.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Strict owner access on an owner with no keys.
    #[error("No keys for '{owner}'")]
    NotFound {
        /// The owner (or URL) that was looked up.
        owner: String,
    },

    /// Input that is structurally wrong: a JWKS without `keys`, an
    /// undecodable token.
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// A token names an algorithm that no key type can serve.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Refreshing a remote key set failed.
    #[error("Remote key update for '{owner}' failed: {source}")]
    RemoteUpdate {
        /// Owner of the bundle that failed to refresh.
        owner: String,
        /// The bundle-level failure (HTTP status, malformed JWKS, transport).
        #[source]
        source: BundleError,
    },

    /// A key bundle could not be built or loaded.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// A persisted JWKS file could not be read or written.
    #[error("Failed to access '{path}': {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl KeyJarError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(owner: impl Into<String>) -> Self {
        Self::NotFound { owner: owner.into() }
    }

    /// Creates a new `MalformedData` error.
    #[must_use]
    pub fn malformed_data(message: impl Into<String>) -> Self {
        Self::MalformedData(message.into())
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates a new `RemoteUpdate` error.
    #[must_use]
    pub fn remote_update(owner: impl Into<String>, source: BundleError) -> Self {
        Self::RemoteUpdate { owner: owner.into(), source }
    }

    /// Creates a new `Io` error.
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Returns `true` for failures of a remote key source.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        match self {
            Self::RemoteUpdate { .. } => true,
            Self::Bundle(e) => e.is_remote(),
            _ => false,
        }
    }
}

/// Result type alias for key jar operations.
pub type KeyJarResult<T> = std::result::Result<T, KeyJarError>;
