//! Key bundles for the OIDC key jar.
//!
//! This crate provides the JSON Web Key model and the [`KeyBundle`] trait: a
//! group of keys that share one origin and refresh together. The key jar in
//! `oidc-keyjar` stores bundles per owner and never reads a key source
//! itself.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        oidc-keyjar                          │
//! │      KeyJar: owner → [Box<dyn KeyBundle>], selection        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     oidc-keyjar-bundle                      │
//! │   KeyBundle trait · BundleFactory · Key / Jwks · generate   │
//! ├──────────────┬──────────────────┬───────────────────────────┤
//! │   Literal    │  JWKS / PEM file │    Remote JWKS (reqwest)  │
//! └──────────────┴──────────────────┴───────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use oidc_keyjar_bundle::{Bundle, KeyBundle, KeyType, KeyUse, new_ec_key};
//!
//! let key = new_ec_key("P-256").unwrap().with_use(KeyUse::Sig).with_kid("ec-1");
//! let bundle = Bundle::from_keys(vec![key]);
//!
//! let public = bundle.to_jwks(false);
//! assert_eq!(public.len(), 1);
//! assert!(!public.keys[0].is_private_key());
//! assert_eq!(bundle.get(KeyType::Ec).len(), 1);
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with key fixtures and the
//!   `assert_bundle_error!` macro. Enable this in `[dev-dependencies]` for
//!   integration tests.

#![deny(unsafe_code)]

pub mod bundle;
pub mod error;
pub mod generate;
pub mod key;
mod remote;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use bundle::{Bundle, BundleFactory, BundleOptions, BundleSource, DefaultBundleFactory, KeyBundle};
pub use error::{BoxError, BundleError, BundleResult};
pub use generate::{
    DEFAULT_EC_CURVE, DEFAULT_RSA_KEY_SIZE, MIN_RSA_KEY_SIZE, new_ec_key, new_rsa_key,
    new_symmetric_key, rsa_key_from_pem,
};
pub use key::{EcParameters, Jwks, Key, KeyParameters, OctParameters, RsaParameters};
pub use remote::DEFAULT_FETCH_TIMEOUT;
pub use types::{KeyType, KeyUse, harmonize_usage};
pub use zeroize::Zeroizing;
