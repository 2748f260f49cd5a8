//! Key bundle error types and result alias.
//!
//! Every [`KeyBundle`](crate::KeyBundle) implementation maps its internal
//! failures to these variants, so the key jar can tell a misconfigured source
//! apart from a remote endpoint that misbehaved.
//!
//! # Error Types
//!
//! - [`BundleError::Io`] - A local key file could not be read
//! - [`BundleError::Deserialization`] - Key material or a JWKS document could not be decoded
//! - [`BundleError::UnsupportedKey`] - The key type or curve is not handled
//! - [`BundleError::RemoteUpdate`] - A remote JWKS endpoint answered with a non-success status
//! - [`BundleError::MalformedJwks`] - A remote JWKS endpoint returned something that is not a JWKS
//! - [`BundleError::Http`] - The HTTP request itself failed (connect, TLS, timeout)
//! - [`BundleError::Configuration`] - Bundle options are invalid
//!
//! # Example
//!
//! ```
//! use oidc_keyjar_bundle::{BundleError, BundleResult};
//!
//! fn fetch(url: &str) -> BundleResult<()> {
//!     Err(BundleError::remote_update(url, 503))
//! }
//!
//! let err = fetch("https://idp.example.com/jwks").unwrap_err();
//! assert_eq!(
//!     err.to_string(),
//!     "Remote key update from 'https://idp.example.com/jwks' failed, HTTP status 503"
//! );
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for key bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

/// Errors raised while loading, generating, refreshing or converting keys.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BundleError {
    /// A local key source could not be read.
    #[error("Failed to read key source '{path}': {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Key material or a JWKS document could not be decoded.
    #[error("Deserialization not possible: {message}")]
    Deserialization {
        /// Description of what failed to decode.
        message: String,
        /// The underlying decoding error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Key type, curve or algorithm not handled by this implementation.
    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    /// Remote endpoint answered with a non-success HTTP status.
    #[error("Remote key update from '{url}' failed, HTTP status {status}")]
    RemoteUpdate {
        /// The JWKS URL that was fetched.
        url: String,
        /// The HTTP status code returned.
        status: u16,
    },

    /// Remote endpoint returned a body that is not a JWKS.
    #[error("Remote key update from {url} failed, malformed JWKS.")]
    MalformedJwks {
        /// The JWKS URL that was fetched.
        url: String,
    },

    /// The HTTP request failed before a response was received.
    #[error("HTTP request to '{url}' failed: {source}")]
    Http {
        /// The JWKS URL that was fetched.
        url: String,
        /// The transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Bundle options are invalid (bad CA bundle, unusable URL).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BundleError {
    /// Creates a new `Io` error for the given path.
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Creates a new `Deserialization` error with the given message.
    #[must_use]
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization { message: message.into(), source: None }
    }

    /// Creates a new `Deserialization` error with a message and source error.
    #[must_use]
    pub fn deserialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Deserialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `UnsupportedKey` error.
    #[must_use]
    pub fn unsupported_key(message: impl Into<String>) -> Self {
        Self::UnsupportedKey(message.into())
    }

    /// Creates a new `RemoteUpdate` error.
    #[must_use]
    pub fn remote_update(url: impl Into<String>, status: u16) -> Self {
        Self::RemoteUpdate { url: url.into(), status }
    }

    /// Creates a new `MalformedJwks` error.
    #[must_use]
    pub fn malformed_jwks(url: impl Into<String>) -> Self {
        Self::MalformedJwks { url: url.into() }
    }

    /// Creates a new `Http` error.
    #[must_use]
    pub fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http { url: url.into(), source }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns `true` when the failure came from talking to a remote source.
    ///
    /// Callers on the explicit update path surface these; the trust-extension
    /// path treats them as "the extension did not happen".
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteUpdate { .. } | Self::MalformedJwks { .. } | Self::Http { .. })
    }
}
