//! Security-focused key selection tests.
//!
//! These tests verify that token-driven key resolution resists the usual JWT
//! attack vectors: `alg: none`, algorithm confusion, keys borrowed from
//! unrelated owners, ambiguous key choice without a `kid`, and attacker-chosen
//! `jku` URLs.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{Algorithm, Header, Validation};
use oidc_keyjar::{
    KeyJar, KeyJarError, OWN_KEYS, ResolutionOptions, assert_keyjar_error,
    testutil::{craft_raw_jwe, craft_raw_jwt, jar_with, parse_token, signed_jwt, signed_jwt_with_header},
};
use oidc_keyjar_bundle::{
    Bundle, Jwks, Key, KeyUse,
    testutil::{ec_key, kids, oct_key, retired, small_rsa_key},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const OP: &str = "https://op.example.com";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Checks the signature of `token` with `key`, ignoring claim validation.
fn signature_valid(token: &str, key: &Key, alg: Algorithm) -> bool {
    let mut validation = Validation::new(alg);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    jsonwebtoken::decode::<serde_json::Value>(token, &key.decoding_key().unwrap(), &validation)
        .is_ok()
}

fn public_jwks(keys: &[Key]) -> String {
    Jwks::new(keys.iter().filter_map(Key::to_public).collect()).to_json().unwrap()
}

async fn serve_jwks(server: &MockServer, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Algorithm handling
// ---------------------------------------------------------------------------

#[test]
fn none_algorithm_is_rejected() {
    let jar = jar_with(OP, vec![oct_key("k1", KeyUse::Sig)]);
    let token = parse_token(&craft_raw_jwt(&json!({"alg": "none"}), &json!({"iss": OP})));

    let result = jar.jwt_verify_keys(&token, &ResolutionOptions::default());
    assert_keyjar_error!(result, UnsupportedAlgorithm);
}

#[test]
fn unknown_algorithm_is_rejected() {
    let jar = jar_with(OP, vec![ec_key("k1", KeyUse::Sig)]);
    let token = parse_token(&craft_raw_jwt(&json!({"alg": "EdDSA"}), &json!({"iss": OP})));

    let result = jar.jwt_verify_keys(&token, &ResolutionOptions::default());
    assert_keyjar_error!(result, UnsupportedAlgorithm);
}

#[test]
fn hmac_token_never_selects_rsa_public_key() {
    // Algorithm confusion: an HS256 token must not be checked with an RSA
    // public key used as an HMAC secret.
    let jar = jar_with(OP, vec![small_rsa_key("rsa-1", KeyUse::Sig)]);
    let token = parse_token(&craft_raw_jwt(
        &json!({"alg": "HS256", "kid": "rsa-1"}),
        &json!({"iss": OP}),
    ));

    let keys = jar.jwt_verify_keys(&token, &ResolutionOptions::default()).unwrap();
    assert!(keys.is_empty(), "RSA key offered for HS256: {keys:?}");
}

// ---------------------------------------------------------------------------
// Owner isolation
// ---------------------------------------------------------------------------

#[test]
fn keys_of_unrelated_owners_are_never_returned() {
    let mut jar = jar_with(OP, vec![ec_key("shared-kid", KeyUse::Sig)]);
    jar.add_bundle("https://evil.example.com", Box::new(Bundle::from_keys(vec![ec_key("shared-kid", KeyUse::Sig)])));

    let signer = jar.owner_keys(OP).unwrap()[0].clone();
    let token = signed_jwt(&signer, Algorithm::ES256, &json!({"iss": OP}));

    let keys = jar.jwt_verify_keys(&parse_token(&token), &ResolutionOptions::default()).unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(*keys[0], signer);
    assert!(signature_valid(&token, keys[0], Algorithm::ES256));
}

#[test]
fn audience_and_client_id_owners_contribute_keys() {
    let mut jar = KeyJar::default();
    jar.add_symmetric("rp-1", b"rp-1 secret", &[KeyUse::Sig]);
    jar.add_symmetric("rp-2", b"rp-2 secret", &[KeyUse::Sig]);
    jar.add_symmetric("client", b"client secret", &[KeyUse::Sig]);
    jar.add_symmetric("bystander", b"other secret", &[KeyUse::Sig]);

    let token = parse_token(&craft_raw_jwt(
        &json!({"alg": "HS256"}),
        &json!({"aud": ["rp-1", "rp-2"], "client_id": "client"}),
    ));
    let keys = jar.jwt_verify_keys(&token, &ResolutionOptions::default()).unwrap();
    assert_eq!(keys.len(), 3);
    assert!(!keys.contains(&jar.owner_keys("bystander").unwrap()[0]));
}

// ---------------------------------------------------------------------------
// Missing kid
// ---------------------------------------------------------------------------

#[test]
fn ambiguous_keys_without_kid_select_nothing() {
    let keys = vec![
        small_rsa_key("unused", KeyUse::Sig),
        small_rsa_key("unused", KeyUse::Sig),
    ];
    // Strip the kids: the owner publishes two keys nobody can tell apart.
    let jwks = json!({"keys": keys.iter().map(|k| {
        let mut value = serde_json::to_value(k.to_public().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("kid");
        value
    }).collect::<Vec<_>>()});

    let mut jar = KeyJar::default();
    jar.import_jwks(&jwks, OP).unwrap();
    let token = parse_token(&craft_raw_jwt(&json!({"alg": "RS256"}), &json!({"iss": OP})));

    let none = jar.jwt_verify_keys(&token, &ResolutionOptions::default()).unwrap();
    assert!(none.is_empty());

    let options = ResolutionOptions::builder().allow_missing_kid(true).build();
    assert_eq!(jar.jwt_verify_keys(&token, &options).unwrap().len(), 2);

    let options = ResolutionOptions::builder()
        .no_kid_issuer(HashMap::from([(OP.to_owned(), Vec::new())]))
        .build();
    assert_eq!(jar.jwt_verify_keys(&token, &options).unwrap().len(), 2);

    let options = ResolutionOptions::builder()
        .no_kid_issuer(HashMap::from([("https://someone.else".to_owned(), Vec::new())]))
        .build();
    assert!(jar.jwt_verify_keys(&token, &options).unwrap().is_empty());
}

#[test]
fn single_key_without_kid_is_selected() {
    let signer = ec_key("only", KeyUse::Sig);
    let jar = jar_with(OP, vec![signer.clone()]);

    let token = signed_jwt_with_header(&signer, Header::new(Algorithm::ES256), &json!({"iss": OP}));
    let keys = jar.jwt_verify_keys(&parse_token(&token), &ResolutionOptions::default()).unwrap();
    assert_eq!(keys.len(), 1);
    assert!(signature_valid(&token, keys[0], Algorithm::ES256));
}

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

#[test]
fn retired_keys_verify_but_never_sign() {
    let old = ec_key("old", KeyUse::Sig);
    let token = signed_jwt(&old, Algorithm::ES256, &json!({"iss": OP}));

    let jar = jar_with(OP, vec![ec_key("new", KeyUse::Sig), retired(old, Utc::now())]);

    let keys = jar.jwt_verify_keys(&parse_token(&token), &ResolutionOptions::default()).unwrap();
    assert_eq!(kids(keys.iter().copied()), vec!["old"]);
    assert!(signature_valid(&token, keys[0], Algorithm::ES256));

    assert_eq!(kids(jar.signing_keys(None, OP, None)), vec!["new"]);
    assert!(jar.export_jwks(false, OP).keys.iter().all(|k| k.kid() == Some("new")));
}

// ---------------------------------------------------------------------------
// Decryption and export
// ---------------------------------------------------------------------------

#[test]
fn decrypt_keys_require_private_material() {
    let private = small_rsa_key("enc-private", KeyUse::Enc);
    let public_only = small_rsa_key("enc-public", KeyUse::Enc).to_public().unwrap();
    let jar = jar_with(OWN_KEYS, vec![private, public_only]);

    let token = parse_token(&craft_raw_jwe(&json!({"alg": "RSA-OAEP", "enc": "A256GCM"})));
    let keys = jar.jwt_decrypt_keys(&token).unwrap();
    assert_eq!(kids(keys.iter().copied()), vec!["enc-private"]);
}

#[test]
fn decrypt_keys_never_come_from_peers() {
    let jar = jar_with(OP, vec![oct_key("peer", KeyUse::Enc)]);
    let token = parse_token(&craft_raw_jwe(&json!({"alg": "A128KW", "enc": "A128GCM", "kid": "peer"})));
    assert!(jar.jwt_decrypt_keys(&token).unwrap().is_empty());
}

#[test]
fn public_export_never_contains_private_material() {
    let jar = jar_with(
        OWN_KEYS,
        vec![small_rsa_key("rsa", KeyUse::Sig), ec_key("ec", KeyUse::Sig), oct_key("oct", KeyUse::Sig)],
    );
    let json: serde_json::Value =
        serde_json::from_str(&jar.export_jwks_as_json(false, OWN_KEYS).unwrap()).unwrap();
    let keys = json["keys"].as_array().unwrap();

    assert_eq!(keys.len(), 2, "symmetric keys are not public");
    for key in keys {
        for member in ["d", "p", "q", "dp", "dq", "qi", "k"] {
            assert!(key.get(member).is_none(), "public export leaked '{member}': {key}");
        }
    }
}

// ---------------------------------------------------------------------------
// Trust extension via jku
// ---------------------------------------------------------------------------

fn jku_token(signer: &Key, jku: &str) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = signer.kid().map(str::to_owned);
    header.jku = Some(jku.to_owned());
    signed_jwt_with_header(signer, header, &json!({"iss": OP}))
}

#[tokio::test]
async fn jku_is_ignored_unless_trusting() {
    let server = MockServer::start().await;
    let signer = ec_key("remote", KeyUse::Sig);
    serve_jwks(&server, 200, public_jwks(std::slice::from_ref(&signer))).await;

    let mut jar = KeyJar::default();
    let token = parse_token(&jku_token(&signer, &format!("{}/jwks", server.uri())));

    let keys = jar.get_jwt_verify_keys(&token, &ResolutionOptions::default()).await.unwrap();
    assert!(keys.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty(), "jku fetched without trust");
    assert!(!jar.contains_owner(OP));
}

#[tokio::test]
async fn trusting_fetches_jku_before_resolving() {
    let server = MockServer::start().await;
    let signer = ec_key("remote", KeyUse::Sig);
    serve_jwks(&server, 200, public_jwks(std::slice::from_ref(&signer))).await;

    let jku = format!("{}/jwks", server.uri());
    let raw = jku_token(&signer, &jku);
    let token = parse_token(&raw);
    let options = ResolutionOptions::builder().trusting(true).build();

    let mut jar = KeyJar::default();
    let keys = jar.get_jwt_verify_keys(&token, &options).await.unwrap();
    assert_eq!(kids(keys.iter().copied()), vec!["remote"]);
    assert!(signature_valid(&raw, keys[0], Algorithm::ES256));
    assert!(jar.find(&jku, OP).is_some());

    // A known source is not fetched again.
    jar.get_jwt_verify_keys(&token, &options).await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(jar.bundles(OP).unwrap().len(), 1);
}

#[tokio::test]
async fn trusted_jku_joins_issuer_stored_with_trailing_slash() {
    let server = MockServer::start().await;
    let signer = ec_key("remote", KeyUse::Sig);
    serve_jwks(&server, 200, public_jwks(std::slice::from_ref(&signer))).await;

    let stored = format!("{OP}/");
    let jku = format!("{}/jwks", server.uri());
    let token = parse_token(&jku_token(&signer, &jku));
    let options = ResolutionOptions::builder().trusting(true).build();

    let mut jar = jar_with(&stored, vec![oct_key("local", KeyUse::Sig)]);
    assert!(jar.extend_trust(&token, &options).await);
    assert!(!jar.contains_owner(OP), "no second spelling of the issuer");
    assert!(jar.find(&jku, &stored).is_some());
    assert_eq!(jar.bundles(&stored).unwrap().len(), 2);

    assert!(!jar.extend_trust(&token, &options).await, "known source under the stored name");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_jku_fetch_is_discarded() {
    let server = MockServer::start().await;
    serve_jwks(&server, 500, "boom".to_owned()).await;

    let signer = ec_key("remote", KeyUse::Sig);
    let token = parse_token(&jku_token(&signer, &format!("{}/jwks", server.uri())));
    let options = ResolutionOptions::builder().trusting(true).build();

    let mut jar = KeyJar::default();
    assert!(!jar.extend_trust(&token, &options).await);
    let keys = jar.get_jwt_verify_keys(&token, &options).await.unwrap();
    assert!(keys.is_empty());
    assert!(!jar.contains_owner(OP));
}

#[tokio::test]
async fn jku_without_issuer_is_ignored() {
    let server = MockServer::start().await;
    let signer = ec_key("remote", KeyUse::Sig);
    serve_jwks(&server, 200, public_jwks(std::slice::from_ref(&signer))).await;

    let mut header = Header::new(Algorithm::ES256);
    header.jku = Some(format!("{}/jwks", server.uri()));
    let token = parse_token(&signed_jwt_with_header(&signer, header, &json!({"sub": "x"})));

    let mut jar = KeyJar::default();
    let options = ResolutionOptions::builder().trusting(true).build();
    assert!(!jar.extend_trust(&token, &options).await);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[test]
fn malformed_tokens_are_rejected() {
    for token in ["", "abc", "a.b", "e30.e30.sig.extra", "not-base64!.e30.sig"] {
        let result = oidc_keyjar::UnverifiedToken::parse(token);
        assert!(matches!(result, Err(KeyJarError::MalformedData(_))), "accepted {token:?}");
    }
}
