//! Key generation and conversion between JWK components and native key types.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{OsRng, RngCore};
use rsa::{
    BigUint, RsaPrivateKey,
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    pkcs8::DecodePrivateKey,
    traits::{PrivateKeyParts, PublicKeyParts},
};
use zeroize::Zeroizing;

use crate::{
    error::{BundleError, BundleResult},
    key::{EcParameters, Key, KeyParameters, RsaParameters, decode_b64},
};

/// Default RSA modulus size in bits.
pub const DEFAULT_RSA_KEY_SIZE: usize = 2048;

/// Default elliptic curve.
pub const DEFAULT_EC_CURVE: &str = "P-256";

/// Smallest RSA modulus this crate will generate.
pub const MIN_RSA_KEY_SIZE: usize = 1024;

/// Generates a fresh RSA key pair with public exponent 65537.
///
/// # Errors
///
/// Returns [`BundleError::Configuration`] if `bits` is below
/// [`MIN_RSA_KEY_SIZE`], or [`BundleError::UnsupportedKey`] if generation
/// fails.
pub fn new_rsa_key(bits: usize) -> BundleResult<Key> {
    if bits < MIN_RSA_KEY_SIZE {
        return Err(BundleError::configuration(format!(
            "RSA key size must be at least {MIN_RSA_KEY_SIZE} bits, got {bits}"
        )));
    }
    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| BundleError::unsupported_key(format!("RSA key generation failed: {e}")))?;
    Ok(rsa_to_key(&private))
}

/// Generates a fresh EC key pair on the named curve.
///
/// # Errors
///
/// Returns [`BundleError::UnsupportedKey`] for curves other than `P-256`
/// and `P-384`.
pub fn new_ec_key(crv: &str) -> BundleResult<Key> {
    let params = match crv {
        "P-256" => {
            let secret = p256::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            ec_params(crv, point.x(), point.y(), &secret.to_bytes())?
        },
        "P-384" => {
            let secret = p384::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            ec_params(crv, point.x(), point.y(), &secret.to_bytes())?
        },
        other => {
            return Err(BundleError::unsupported_key(format!("unsupported curve '{other}'")));
        },
    };
    Ok(Key::new(KeyParameters::Ec(params)))
}

/// Generates a random symmetric key of `len` bytes.
#[must_use]
pub fn new_symmetric_key(len: usize) -> Key {
    let mut secret = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut secret);
    Key::symmetric(&secret)
}

/// Loads an RSA private key from PEM text (PKCS#8 or PKCS#1).
///
/// # Errors
///
/// Returns [`BundleError::Deserialization`] if the text holds neither form.
pub fn rsa_key_from_pem(pem: &str) -> BundleResult<Key> {
    let private = RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| BundleError::deserialization_with_source("not an RSA private key PEM", e))?;
    Ok(rsa_to_key(&private))
}

fn b64(n: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(n.to_bytes_be())
}

fn b64_secret(n: &BigUint) -> Option<Zeroizing<String>> {
    Some(Zeroizing::new(b64(n)))
}

fn rsa_to_key(private: &RsaPrivateKey) -> Key {
    let one = BigUint::from(1u32);
    let two = BigUint::from(2u32);
    let (d, primes) = (private.d(), private.primes());

    // CRT values are recomputed from the two primes so the exported JWK is
    // complete regardless of what the key object cached.
    let crt = match primes {
        [p, q] => Some((
            d % (p - &one),
            d % (q - &one),
            q.modpow(&(p - &two), p),
        )),
        _ => None,
    };

    let params = RsaParameters {
        n: b64(private.n()),
        e: b64(private.e()),
        d: b64_secret(d),
        p: primes.first().and_then(b64_secret),
        q: primes.get(1).and_then(b64_secret),
        dp: crt.as_ref().and_then(|(dp, _, _)| b64_secret(dp)),
        dq: crt.as_ref().and_then(|(_, dq, _)| b64_secret(dq)),
        qi: crt.as_ref().and_then(|(_, _, qi)| b64_secret(qi)),
    };
    Key::new(KeyParameters::Rsa(params))
}

fn ec_params(
    crv: &str,
    x: Option<&impl AsRef<[u8]>>,
    y: Option<&impl AsRef<[u8]>>,
    d: &[u8],
) -> BundleResult<EcParameters> {
    let (Some(x), Some(y)) = (x, y) else {
        return Err(BundleError::unsupported_key("EC public key is the identity point"));
    };
    Ok(EcParameters {
        crv: crv.to_owned(),
        x: URL_SAFE_NO_PAD.encode(x.as_ref()),
        y: URL_SAFE_NO_PAD.encode(y.as_ref()),
        d: Some(Zeroizing::new(URL_SAFE_NO_PAD.encode(d))),
    })
}

fn biguint(value: &str) -> BundleResult<BigUint> {
    Ok(BigUint::from_bytes_be(&decode_b64(value)?))
}

/// PKCS#1 DER encoding of an RSA private JWK.
pub(crate) fn rsa_private_der(rsa: &RsaParameters) -> BundleResult<Zeroizing<Vec<u8>>> {
    let (Some(d), Some(p), Some(q)) = (&rsa.d, &rsa.p, &rsa.q) else {
        return Err(BundleError::unsupported_key("RSA key has no private material"));
    };
    let private = RsaPrivateKey::from_components(
        biguint(&rsa.n)?,
        biguint(&rsa.e)?,
        biguint(d)?,
        vec![biguint(p)?, biguint(q)?],
    )
    .map_err(|e| BundleError::deserialization_with_source("invalid RSA private key", e))?;
    let der = private
        .to_pkcs1_der()
        .map_err(|e| BundleError::deserialization_with_source("RSA key encoding failed", e))?;
    Ok(Zeroizing::new(der.as_bytes().to_vec()))
}

/// PKCS#8 DER encoding of an EC private JWK.
pub(crate) fn ec_private_pkcs8(ec: &EcParameters) -> BundleResult<Zeroizing<Vec<u8>>> {
    use p256::pkcs8::EncodePrivateKey;

    let Some(d) = &ec.d else {
        return Err(BundleError::unsupported_key("EC key has no private material"));
    };
    let scalar = decode_b64(d)?;
    let der = match ec.crv.as_str() {
        "P-256" => p256::SecretKey::from_slice(&scalar)
            .map_err(|e| BundleError::deserialization_with_source("invalid P-256 scalar", e))?
            .to_pkcs8_der(),
        "P-384" => p384::SecretKey::from_slice(&scalar)
            .map_err(|e| BundleError::deserialization_with_source("invalid P-384 scalar", e))?
            .to_pkcs8_der(),
        other => {
            return Err(BundleError::unsupported_key(format!("no signer for curve '{other}'")));
        },
    }
    .map_err(|e| BundleError::deserialization_with_source("EC key encoding failed", e))?;
    Ok(Zeroizing::new(der.as_bytes().to_vec()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::KeyType;

    #[test]
    fn test_new_rsa_key_is_complete() {
        let key = new_rsa_key(MIN_RSA_KEY_SIZE).unwrap();
        assert_eq!(key.kty(), KeyType::Rsa);
        assert!(key.is_private_key());

        let KeyParameters::Rsa(rsa) = key.params() else { panic!("expected RSA") };
        assert_eq!(rsa.e, "AQAB");
        assert!(rsa.dp.is_some() && rsa.dq.is_some() && rsa.qi.is_some());

        // The exported components must rebuild into a valid key.
        assert!(rsa_private_der(rsa).is_ok());
    }

    #[test]
    fn test_rsa_key_size_floor() {
        assert!(matches!(new_rsa_key(512), Err(BundleError::Configuration(_))));
    }

    #[test]
    fn test_new_ec_keys() {
        for crv in ["P-256", "P-384"] {
            let key = new_ec_key(crv).unwrap();
            assert_eq!(key.crv(), Some(crv));
            assert!(key.is_private_key());
            assert!(key.encoding_key().is_ok());
            assert!(key.decoding_key().is_ok());
        }
    }

    #[test]
    fn test_unsupported_curve() {
        assert!(matches!(new_ec_key("P-521"), Err(BundleError::UnsupportedKey(_))));
    }

    #[test]
    fn test_symmetric_keys_differ() {
        let a = new_symmetric_key(32);
        let b = new_symmetric_key(32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_rsa_pem_round_trip() {
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};

        let private = RsaPrivateKey::new(&mut OsRng, MIN_RSA_KEY_SIZE).unwrap();
        let pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
        let key = rsa_key_from_pem(&pem).unwrap();
        assert_eq!(key, rsa_to_key(&private));
    }

    #[test]
    fn test_garbage_pem_is_rejected() {
        assert!(matches!(
            rsa_key_from_pem("-----BEGIN NOTHING-----"),
            Err(BundleError::Deserialization { .. })
        ));
    }
}
