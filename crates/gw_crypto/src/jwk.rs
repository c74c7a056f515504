//! JWK encode/decode for the long-term keypairs.
//!
//! The relay stores public keys and wrapped private keys as JWK JSON
//! strings, so the exact field shapes here are wire format. Big integers
//! are base64url without padding, big-endian, per RFC 7518.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// One JWK shape for both key types; absent fields are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    // RSA
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    // EC
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    // Private exponent / scalar, shared by both key types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
}

impl Jwk {
    fn empty(kty: &str) -> Self {
        Self {
            kty: kty.to_string(),
            alg: None,
            n: None,
            e: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            crv: None,
            x: None,
            y: None,
            d: None,
            key_ops: None,
            ext: None,
        }
    }
}

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(field: &str, value: &Option<String>) -> Result<BigUint, CryptoError> {
    let raw = value
        .as_deref()
        .ok_or_else(|| CryptoError::InvalidKey(format!("JWK missing field `{field}`")))?;
    let bytes = URL_SAFE_NO_PAD.decode(raw)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

fn decode_scalar(field: &str, value: &Option<String>) -> Result<Vec<u8>, CryptoError> {
    let raw = value
        .as_deref()
        .ok_or_else(|| CryptoError::InvalidKey(format!("JWK missing field `{field}`")))?;
    Ok(URL_SAFE_NO_PAD.decode(raw)?)
}

// ── RSA ───────────────────────────────────────────────────────────────────────

pub fn rsa_public_to_jwk(key: &RsaPublicKey) -> Jwk {
    let mut jwk = Jwk::empty("RSA");
    jwk.alg = Some("RSA-OAEP-256".to_string());
    jwk.n = Some(encode_uint(key.n()));
    jwk.e = Some(encode_uint(key.e()));
    jwk.key_ops = Some(vec!["encrypt".to_string()]);
    jwk.ext = Some(true);
    jwk
}

pub fn rsa_private_to_jwk(key: &RsaPrivateKey) -> Result<Jwk, CryptoError> {
    let primes = key.primes();
    if primes.len() != 2 {
        return Err(CryptoError::InvalidKey(format!(
            "RSA key must have exactly two primes, got {}",
            primes.len()
        )));
    }
    let (p, q) = (&primes[0], &primes[1]);
    let d = key.d();
    let one = BigUint::from(1u8);
    let two = BigUint::from(2u8);

    let mut jwk = Jwk::empty("RSA");
    jwk.alg = Some("RSA-OAEP-256".to_string());
    jwk.n = Some(encode_uint(key.n()));
    jwk.e = Some(encode_uint(key.e()));
    jwk.d = Some(encode_uint(d));
    jwk.p = Some(encode_uint(p));
    jwk.q = Some(encode_uint(q));
    // CRT parameters per RFC 7518 §6.3.2; qi via Fermat since p is prime.
    jwk.dp = Some(encode_uint(&(d % (p - &one))));
    jwk.dq = Some(encode_uint(&(d % (q - &one))));
    jwk.qi = Some(encode_uint(&q.modpow(&(p - &two), p)));
    jwk.key_ops = Some(vec!["decrypt".to_string()]);
    jwk.ext = Some(true);
    Ok(jwk)
}

pub fn rsa_public_from_jwk(jwk: &Jwk) -> Result<RsaPublicKey, CryptoError> {
    if jwk.kty != "RSA" {
        return Err(CryptoError::InvalidKey(format!(
            "expected kty RSA, got {}",
            jwk.kty
        )));
    }
    let n = decode_uint("n", &jwk.n)?;
    let e = decode_uint("e", &jwk.e)?;
    RsaPublicKey::new(n, e).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

pub fn rsa_private_from_jwk(jwk: &Jwk) -> Result<RsaPrivateKey, CryptoError> {
    if jwk.kty != "RSA" {
        return Err(CryptoError::InvalidKey(format!(
            "expected kty RSA, got {}",
            jwk.kty
        )));
    }
    let n = decode_uint("n", &jwk.n)?;
    let e = decode_uint("e", &jwk.e)?;
    let d = decode_uint("d", &jwk.d)?;
    let p = decode_uint("p", &jwk.p)?;
    let q = decode_uint("q", &jwk.q)?;
    RsaPrivateKey::from_components(n, e, d, vec![p, q])
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

// ── ECDSA P-256 ───────────────────────────────────────────────────────────────

pub fn ecdsa_public_to_jwk(key: &VerifyingKey) -> Result<Jwk, CryptoError> {
    let point = key.to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| CryptoError::InvalidKey("EC point missing x coordinate".into()))?;
    let y = point
        .y()
        .ok_or_else(|| CryptoError::InvalidKey("EC point missing y coordinate".into()))?;

    let mut jwk = Jwk::empty("EC");
    jwk.crv = Some("P-256".to_string());
    jwk.x = Some(URL_SAFE_NO_PAD.encode(x));
    jwk.y = Some(URL_SAFE_NO_PAD.encode(y));
    jwk.key_ops = Some(vec!["verify".to_string()]);
    jwk.ext = Some(true);
    Ok(jwk)
}

pub fn ecdsa_private_to_jwk(key: &SigningKey) -> Result<Jwk, CryptoError> {
    let mut jwk = ecdsa_public_to_jwk(key.verifying_key())?;
    jwk.d = Some(URL_SAFE_NO_PAD.encode(key.to_bytes()));
    jwk.key_ops = Some(vec!["sign".to_string()]);
    Ok(jwk)
}

pub fn ecdsa_public_from_jwk(jwk: &Jwk) -> Result<VerifyingKey, CryptoError> {
    check_p256(jwk)?;
    let x = decode_scalar("x", &jwk.x)?;
    let y = decode_scalar("y", &jwk.y)?;
    if x.len() != 32 || y.len() != 32 {
        return Err(CryptoError::InvalidKey(
            "P-256 coordinates must be 32 bytes".into(),
        ));
    }
    let point = EncodedPoint::from_affine_coordinates(
        &FieldBytes::clone_from_slice(&x),
        &FieldBytes::clone_from_slice(&y),
        false,
    );
    let key = VerifyingKey::from_encoded_point(&point)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(key)
}

pub fn ecdsa_private_from_jwk(jwk: &Jwk) -> Result<SigningKey, CryptoError> {
    check_p256(jwk)?;
    let d = decode_scalar("d", &jwk.d)?;
    SigningKey::from_slice(&d).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

fn check_p256(jwk: &Jwk) -> Result<(), CryptoError> {
    if jwk.kty != "EC" {
        return Err(CryptoError::InvalidKey(format!(
            "expected kty EC, got {}",
            jwk.kty
        )));
    }
    match jwk.crv.as_deref() {
        Some("P-256") => Ok(()),
        other => Err(CryptoError::InvalidKey(format!(
            "expected crv P-256, got {other:?}"
        ))),
    }
}
