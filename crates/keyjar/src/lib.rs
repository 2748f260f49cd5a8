//! # OIDC Key Jar
//!
//! Multi-tenant JSON Web Key storage for OAuth2/OpenID Connect services.
//!
//! This crate provides:
//! - **Key jar**: key bundles per owner (issuer or client), import/export as
//!   JWKS, retention of rotated keys
//! - **Key selection**: keys by usage, type, `kid` and algorithm, with
//!   fallback tiers for tokens without a `kid`
//! - **Token resolution**: candidate keys for verifying a JWS or decrypting
//!   a JWE, with opt-in trust of a token's `jku`
//! - **Lifecycle**: building keys from a specification, persisting them,
//!   rotating and refreshing them
//!
//! ## Example
//!
//! ```no_run
//! use oidc_keyjar::{KeyJar, ResolutionOptions, UnverifiedToken, update_keyjar};
//!
//! # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let mut jar = KeyJar::default();
//! jar.add_url("https://op.example.com", "https://op.example.com/jwks")?;
//! update_keyjar(&mut jar).await?;
//!
//! let token = UnverifiedToken::parse(token)?;
//! let keys = jar.jwt_verify_keys(&token, &ResolutionOptions::default())?;
//! for key in keys {
//!     let _decoding_key = key.decoding_key()?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Key jar and lifecycle configuration.
pub mod config;
/// Key jar error types.
pub mod error;
/// Token-driven key resolution.
pub mod jwt;
/// The key jar.
pub mod key_jar;
/// Key creation, persistence and refresh.
pub mod lifecycle;
/// Key selection.
pub mod selection;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
/// Algorithm checks.
pub mod validation;

// Re-export key types for convenience
pub use config::{DEFAULT_REMOVE_AFTER, KeyJarConfig, KeySetup, KeySpec};
pub use error::{KeyJarError, KeyJarResult};
pub use jwt::{ResolutionOptions, TokenHeader, UnverifiedToken};
pub use key_jar::{KeyJar, OWN_KEYS};
pub use lifecycle::{build_keyjar, init_key_jar, public_keys_keyjar, rotate_keys, update_keyjar};
pub use selection::Usage;
pub use validation::{FORBIDDEN_ALGORITHMS, validate_algorithm};
