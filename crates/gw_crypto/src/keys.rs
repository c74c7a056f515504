//! Long-term key material.
//!
//! Every principal owns two keypairs generated together: an RSA-OAEP
//! 2048-bit encryption keypair and an ECDSA P-256 signing keypair, both
//! over SHA-256. They share a lifetime and are wrapped together on
//! password change.

use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::jwk;

pub const RSA_KEY_BITS: usize = 2048;

/// Which asymmetric algorithm a wrapped key decodes to. The tag selects
/// the JWK importer, so an RSA blob can never be parsed as a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

/// A private key together with its algorithm tag.
pub enum PrivateKeyMaterial {
    Rsa(RsaPrivateKey),
    Ecdsa(SigningKey),
}

impl PrivateKeyMaterial {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PrivateKeyMaterial::Rsa(_) => KeyAlgorithm::Rsa,
            PrivateKeyMaterial::Ecdsa(_) => KeyAlgorithm::Ecdsa,
        }
    }

    pub fn into_rsa(self) -> Result<RsaPrivateKey, CryptoError> {
        match self {
            PrivateKeyMaterial::Rsa(key) => Ok(key),
            PrivateKeyMaterial::Ecdsa(_) => {
                Err(CryptoError::InvalidKey("expected an RSA private key".into()))
            }
        }
    }

    pub fn into_ecdsa(self) -> Result<SigningKey, CryptoError> {
        match self {
            PrivateKeyMaterial::Ecdsa(key) => Ok(key),
            PrivateKeyMaterial::Rsa(_) => Err(CryptoError::InvalidKey(
                "expected an ECDSA private key".into(),
            )),
        }
    }
}

/// Both long-term keypairs of one principal.
pub struct KeyBundle {
    pub rsa_private: RsaPrivateKey,
    pub rsa_public: RsaPublicKey,
    pub ecdsa_signing: SigningKey,
    pub ecdsa_verifying: VerifyingKey,
}

impl KeyBundle {
    /// Generate a fresh bundle. RSA generation dominates the cost.
    pub fn generate() -> Result<Self, CryptoError> {
        let rsa_private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let rsa_public = RsaPublicKey::from(&rsa_private);
        let ecdsa_signing = SigningKey::random(&mut OsRng);
        let ecdsa_verifying = *ecdsa_signing.verifying_key();
        Ok(Self {
            rsa_private,
            rsa_public,
            ecdsa_signing,
            ecdsa_verifying,
        })
    }

    /// Public halves as JWK JSON strings, the shape the relay stores.
    pub fn public_jwk_strings(&self) -> Result<(String, String), CryptoError> {
        let rsa = serde_json::to_string(&jwk::rsa_public_to_jwk(&self.rsa_public))?;
        let ecdsa = serde_json::to_string(&jwk::ecdsa_public_to_jwk(&self.ecdsa_verifying)?)?;
        Ok((rsa, ecdsa))
    }
}

/// Stable fingerprint of a key: SHA-256 over the exact JWK string as it
/// appeared on the wire. Callers must hash the received string, not a
/// re-serialisation, or fingerprints drift with field ordering.
pub fn fingerprint(raw_jwk: &str) -> String {
    hex::encode(Sha256::digest(raw_jwk.as_bytes()))
}
