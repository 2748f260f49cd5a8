//! Behavioral guarantees of the key jar.
//!
//! Each test pins one property a relying party depends on: which keys a
//! lookup returns, what survives an export/import round trip, how owners are
//! normalized, and how jars compare.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{TimeDelta, Utc};
use oidc_keyjar::{
    KeyJar, KeySpec, OWN_KEYS, ResolutionOptions, Usage, build_keyjar, public_keys_keyjar,
    testutil::{craft_raw_jwt, jar_with, parse_token},
    update_keyjar,
};
use oidc_keyjar_bundle::{
    Bundle, Jwks, Key, KeyType, KeyUse,
    testutil::{ec_key, kids, oct_key, retired, small_rsa_key},
};
use proptest::prelude::*;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

#[test]
fn signing_lookup_returns_exactly_active_rsa_sig_keys() {
    let now = Utc::now();
    let jar = jar_with(
        "https://op.example.com",
        vec![
            small_rsa_key("sig-1", KeyUse::Sig),
            small_rsa_key("enc-1", KeyUse::Enc),
            retired(small_rsa_key("enc-old", KeyUse::Enc), now),
            retired(small_rsa_key("sig-old", KeyUse::Sig), now),
            ec_key("ec-sig", KeyUse::Sig),
            small_rsa_key("sig-2", KeyUse::Sig),
        ],
    );

    let keys = jar.lookup(Usage::Sign, Some(KeyType::Rsa), "https://op.example.com", None, None);
    assert_eq!(kids(keys), vec!["sig-1", "sig-2"]);
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

#[test]
fn private_export_import_round_trip_preserves_material() {
    let originals = vec![
        small_rsa_key("rsa", KeyUse::Sig),
        ec_key("ec", KeyUse::Enc),
        oct_key("oct", KeyUse::Sig),
    ];
    let source = jar_with("o", originals.clone());

    let mut target = KeyJar::default();
    let exported = serde_json::to_value(source.export_jwks(true, "o")).unwrap();
    target.import_jwks(&exported, "o2").unwrap();

    let imported = target.owner_keys("o2").unwrap();
    assert_eq!(imported.len(), originals.len());
    for (original, copy) in originals.iter().zip(&imported) {
        assert_eq!(original, *copy);
        assert_eq!(original.is_private_key(), copy.is_private_key());
    }
    assert_eq!(kids(target.signing_keys(None, "o2", None)), vec!["rsa", "oct"]);
}

#[test]
fn built_keys_published_to_client_yield_one_verify_key() {
    let jar = build_keyjar(&[KeySpec::rsa(&[KeyUse::Sig])], None, None).unwrap();
    let public = jar.export_jwks(false, OWN_KEYS);

    let mut client_jar = KeyJar::default();
    client_jar.import_jwks(&serde_json::to_value(&public).unwrap(), "client1").unwrap();

    let keys = client_jar.lookup(Usage::Verify, Some(KeyType::Rsa), "client1", None, None);
    assert_eq!(keys.len(), 1);
    assert!(keys[0].kid().is_some_and(|kid| !kid.is_empty()));
    assert!(!keys[0].is_private_key());

    let copied = public_keys_keyjar(&jar, OWN_KEYS, None, "client1");
    assert_eq!(copied, client_jar);
}

// ---------------------------------------------------------------------------
// Owner normalization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn owner_with_trailing_slash_matches_without() {
    let server = MockServer::start().await;
    let key = ec_key("idp-key", KeyUse::Sig);
    let body = Jwks::new(vec![key.to_public().unwrap()]).to_json().unwrap();
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let mut jar = KeyJar::default();
    jar.add_url("https://idp/", &format!("{}/jwks", server.uri())).unwrap();
    update_keyjar(&mut jar).await.unwrap();

    let with_slash = jar.verify_keys(None, "https://idp/", None);
    let without = jar.verify_keys(None, "https://idp", None);
    assert_eq!(kids(with_slash.iter().copied()), vec!["idp-key"]);
    assert_eq!(with_slash, without);
}

// ---------------------------------------------------------------------------
// Ambiguity
// ---------------------------------------------------------------------------

#[test]
fn two_rsa_keys_without_kid_resolve_to_nothing() {
    let strip_kid = |key: Key| {
        let mut value = serde_json::to_value(key).unwrap();
        value.as_object_mut().unwrap().remove("kid");
        serde_json::from_value::<Key>(value).unwrap()
    };
    let jar = jar_with(
        "https://op.example.com",
        vec![strip_kid(small_rsa_key("x", KeyUse::Sig)), strip_kid(small_rsa_key("y", KeyUse::Sig))],
    );

    let keys = jar.add_key(
        Vec::new(),
        "https://op.example.com",
        Usage::Verify,
        Some(KeyType::Rsa),
        None,
        &ResolutionOptions::default(),
    );
    assert!(keys.is_empty());

    let token = parse_token(&craft_raw_jwt(&json!({"alg": "RS256"}), &json!({"iss": "https://op.example.com"})));
    assert!(jar.jwt_verify_keys(&token, &ResolutionOptions::default()).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Equality
// ---------------------------------------------------------------------------

#[test]
fn jars_with_different_single_keys_are_unequal() {
    let a = jar_with("a", vec![small_rsa_key("k", KeyUse::Sig)]);
    let b = jar_with("a", vec![small_rsa_key("k", KeyUse::Sig)]);
    assert_ne!(a, b);
    assert_eq!(a, a.copy());
}

// ---------------------------------------------------------------------------
// Invariants under arbitrary input
// ---------------------------------------------------------------------------

fn owner_name() -> impl Strategy<Value = String> {
    "https://[a-z]{1,8}\\.example(/[a-z]{1,4})?"
}

proptest! {
    /// An owner registered with or without a trailing slash is found under
    /// both spellings, and the results are identical.
    #[test]
    fn trailing_slash_is_interchangeable(owner in owner_name(), slash in any::<bool>()) {
        let stored = if slash { format!("{owner}/") } else { owner.clone() };
        let jar = jar_with(&stored, vec![oct_key("k", KeyUse::Sig)]);

        let plain = jar.verify_keys(None, &owner, None);
        let slashed = jar.verify_keys(None, &format!("{owner}/"), None);
        prop_assert_eq!(plain.len(), 1);
        prop_assert_eq!(plain, slashed);
    }

    /// Purging twice at the same instant leaves the jar as purging once did.
    #[test]
    fn remove_outdated_is_idempotent(
        ages in proptest::collection::vec(proptest::collection::vec(proptest::option::of(0i64..10_800), 0..4), 1..5),
    ) {
        let now = Utc::now();
        let mut jar = KeyJar::default();
        for (b, bundle) in ages.iter().enumerate() {
            let keys = bundle
                .iter()
                .enumerate()
                .map(|(k, age)| {
                    let mut key = oct_key(&format!("{b}-{k}"), KeyUse::Sig);
                    if let Some(age) = age {
                        key.mark_inactive(now - TimeDelta::seconds(*age));
                    }
                    key
                })
                .collect();
            jar.add_bundle(&format!("owner-{}", b % 2), Box::new(Bundle::from_keys(keys)));
        }

        jar.remove_outdated(now);
        let once = jar.copy();
        let summary: Vec<String> = once.owners().iter().map(|o| once.key_summary(o)).collect();

        jar.remove_outdated(now);
        let twice: Vec<String> = jar.owners().iter().map(|o| jar.key_summary(o)).collect();
        prop_assert_eq!(summary, twice);
        prop_assert_eq!(once.owners(), jar.owners());
        for owner in jar.owners() {
            prop_assert!(jar.bundles(owner).unwrap().iter().all(|b| !b.is_empty()));
        }
    }
}
