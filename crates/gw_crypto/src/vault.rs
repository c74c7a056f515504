//! Password-derived key wrapping.
//!
//! A private key stored on the relay is AES-256-GCM ciphertext of its JWK
//! encoding, under a key derived from the user password with
//! PBKDF2-HMAC-SHA256. The derived key never leaves this module; the relay
//! only ever holds `{wrappedKey, salt, iv}` and the public JWKs, so any
//! device that knows the password can re-derive and unwrap.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::jwk::{self, Jwk};
use crate::keys::{KeyAlgorithm, PrivateKeyMaterial};
use crate::srp::normalize_password;

pub const KDF_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;

/// The only private-key representation the relay ever sees.
/// Replaced atomically on password change, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    /// AES-256-GCM ciphertext of the JWK bytes, hex.
    pub wrapped_key: String,
    /// PBKDF2 salt, hex.
    pub salt: String,
    /// AES-GCM nonce, hex.
    pub iv: String,
}

fn derive_kek(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut kek = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(
        normalize_password(password).as_bytes(),
        salt,
        KDF_ITERATIONS,
        kek.as_mut(),
    );
    kek
}

/// Wrap a private key under the password. Fresh salt and iv per call.
pub fn wrap(password: &str, key: &PrivateKeyMaterial) -> Result<WrappedKey, CryptoError> {
    let jwk = match key {
        PrivateKeyMaterial::Rsa(key) => jwk::rsa_private_to_jwk(key)?,
        PrivateKeyMaterial::Ecdsa(key) => jwk::ecdsa_private_to_jwk(key)?,
    };
    let jwk_bytes = Zeroizing::new(serde_json::to_vec(&jwk)?);

    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let kek = derive_kek(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(kek.as_ref())
        .map_err(|_| CryptoError::Encrypt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), jwk_bytes.as_slice())
        .map_err(|_| CryptoError::Encrypt)?;

    Ok(WrappedKey {
        wrapped_key: hex::encode(ciphertext),
        salt: hex::encode(salt),
        iv: hex::encode(iv),
    })
}

/// Unwrap a private key with the password. An authentication tag mismatch
/// means the password is wrong (or the blob was altered) and surfaces as
/// `WrongPassword`.
pub fn unwrap(
    password: &str,
    wrapped: &WrappedKey,
    alg: KeyAlgorithm,
) -> Result<PrivateKeyMaterial, CryptoError> {
    let ciphertext = hex::decode(&wrapped.wrapped_key)?;
    let salt = hex::decode(&wrapped.salt)?;
    let iv = hex::decode(&wrapped.iv)?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "wrapped key iv must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }

    let kek = derive_kek(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(kek.as_ref())
        .map_err(|_| CryptoError::WrongPassword)?;
    let jwk_bytes = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| CryptoError::WrongPassword)?,
    );

    let jwk: Jwk = serde_json::from_slice(&jwk_bytes)?;
    match alg {
        KeyAlgorithm::Rsa => Ok(PrivateKeyMaterial::Rsa(jwk::rsa_private_from_jwk(&jwk)?)),
        KeyAlgorithm::Ecdsa => Ok(PrivateKeyMaterial::Ecdsa(jwk::ecdsa_private_from_jwk(
            &jwk,
        )?)),
    }
}
