//! Instance backups: multipart upload control and the self-encrypted
//! backup key.
//!
//! The backup key is encrypted to the instance's own RSA public key and
//! signed with its own ECDSA key, so the relay stores ciphertext it can
//! neither read nor forge. Recovery legitimately happens months later,
//! which is exactly what the envelope freshness opt-out exists for.

use serde_json::{json, Value};

use p256::ecdsa::{SigningKey, VerifyingKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

use gw_crypto::envelope::{self, DecryptOptions, Envelope};
use gw_crypto::CryptoError;
use gw_proto::api::{
    Backup, BackupAbortRequest, BackupFinalizeRequest, BackupInitializeRequest,
    BackupInitializeResponse, CompletedPart,
};

use crate::error::GatewayError;
use crate::rest::RestClient;

#[derive(Clone)]
pub struct BackupClient {
    rest: RestClient,
}

impl BackupClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub async fn initialize(
        &self,
        file_name: &str,
        parts_count: u32,
    ) -> Result<BackupInitializeResponse, GatewayError> {
        self.rest
            .post(
                "/backups/multi_parts/initialize",
                &BackupInitializeRequest {
                    file_name: file_name.to_string(),
                    parts_count,
                },
            )
            .await
    }

    /// Upload one chunk to its presigned URL, returning the part etag.
    pub async fn upload_part(
        &self,
        signed_url: &str,
        chunk: Vec<u8>,
    ) -> Result<String, GatewayError> {
        self.rest.put_presigned(signed_url, chunk).await
    }

    pub async fn finalize(
        &self,
        backup_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<Value, GatewayError> {
        self.rest
            .post(
                "/backups/multi_parts/finalize",
                &BackupFinalizeRequest {
                    backup_id: backup_id.to_string(),
                    parts,
                },
            )
            .await
    }

    pub async fn abort(&self, backup_id: &str) -> Result<Value, GatewayError> {
        self.rest
            .post(
                "/backups/multi_parts/abort",
                &BackupAbortRequest {
                    backup_id: backup_id.to_string(),
                },
            )
            .await
    }

    pub async fn list(&self) -> Result<Vec<Backup>, GatewayError> {
        self.rest.get("/backups").await
    }

    pub async fn download(&self, backup: &Backup) -> Result<Vec<u8>, GatewayError> {
        self.rest.get_signed(&backup.path).await
    }

    /// Store the self-encrypted backup key on the account record.
    pub async fn update_backup_key(&self, stored: Envelope) -> Result<Value, GatewayError> {
        self.rest
            .patch(
                "/users/me",
                &gw_proto::api::UserPatch {
                    encrypted_backup_key: Some(stored),
                    ..Default::default()
                },
            )
            .await
    }

    /// Fetch the stored backup-key envelope, if any.
    pub async fn fetch_backup_key(&self) -> Result<Option<Envelope>, GatewayError> {
        let user: gw_proto::api::UserResponse = self.rest.get("/users/me").await?;
        Ok(user.encrypted_backup_key)
    }

    /// Full multipart upload: initialize, push every chunk, finalize. On
    /// any chunk failure the upload is aborted before the error
    /// propagates.
    pub async fn upload(
        &self,
        file_name: &str,
        chunks: Vec<Vec<u8>>,
    ) -> Result<String, GatewayError> {
        let init = self.initialize(file_name, chunks.len() as u32).await?;
        let mut completed = Vec::with_capacity(init.parts.len());
        for (part, chunk) in init.parts.iter().zip(chunks) {
            match self.upload_part(&part.signed_url, chunk).await {
                Ok(etag) => completed.push(CompletedPart {
                    part_number: part.part_number,
                    etag,
                }),
                Err(e) => {
                    let _ = self.abort(&init.backup_id).await;
                    return Err(e);
                }
            }
        }
        self.finalize(&init.backup_id, completed).await?;
        Ok(init.backup_id)
    }
}

/// Encrypt a backup key to self. The result is safe to hand to the relay.
pub fn encrypt_backup_key(
    self_rsa_public: &RsaPublicKey,
    self_signing: &SigningKey,
    backup_key: &[u8],
) -> Result<Envelope, GatewayError> {
    let payload = json!({ "backupKey": hex::encode(backup_key) });
    Ok(envelope::encrypt(self_rsa_public, self_signing, &payload)?)
}

/// Open a stored backup key. The envelope is typically months old, so the
/// freshness window is disabled; signature and AEAD checks still apply.
pub fn decrypt_backup_key(
    self_rsa_private: &RsaPrivateKey,
    self_ecdsa_public: &VerifyingKey,
    stored: &Envelope,
) -> Result<Vec<u8>, GatewayError> {
    let payload = envelope::decrypt(
        self_rsa_private,
        self_ecdsa_public,
        stored,
        &DecryptOptions {
            disable_timestamp_check: true,
        },
    )?;
    let key_hex = payload
        .get("backupKey")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::Crypto(CryptoError::InvalidKey(
                "stored payload has no backupKey".into(),
            ))
        })?;
    Ok(hex::decode(key_hex).map_err(CryptoError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_crypto::KeyBundle;
    use rand::RngCore;

    #[test]
    fn backup_key_recovery_after_months() {
        let bundle = KeyBundle::generate().expect("generate");
        let mut backup_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut backup_key);

        let mut stored =
            encrypt_backup_key(&bundle.rsa_public, &bundle.ecdsa_signing, &backup_key)
                .expect("encrypt");

        // Simulate months in storage: the freshness window is long gone.
        stored.sent_at -= 90 * 24 * 60 * 60 * 1000;
        // Timestamp participates in the signature; re-stamping without the
        // private key is exactly what an attacker cannot do, so rebuild a
        // genuinely-old envelope by re-signing with the owner key instead.
        let nonce = hex::decode(&stored.nonce).expect("nonce");
        let ciphertext = hex::decode(&stored.ciphertext).expect("ciphertext");
        let mut signed = Vec::new();
        signed.extend_from_slice(&nonce);
        signed.extend_from_slice(&ciphertext);
        signed.extend_from_slice(stored.sent_at.to_string().as_bytes());
        use p256::ecdsa::signature::Signer;
        let signature: p256::ecdsa::Signature = bundle.ecdsa_signing.sign(&signed);
        stored.signature = hex::encode(signature.to_bytes());

        let recovered =
            decrypt_backup_key(&bundle.rsa_private, &bundle.ecdsa_verifying, &stored)
                .expect("recovery ignores staleness");
        assert_eq!(recovered, backup_key);
    }

    #[test]
    fn backup_key_still_authenticated() {
        let bundle = KeyBundle::generate().expect("generate");
        let impostor = KeyBundle::generate().expect("impostor");
        let stored = encrypt_backup_key(&bundle.rsa_public, &impostor.ecdsa_signing, &[7u8; 32])
            .expect("encrypt");

        // Signed by the wrong key: recovery must refuse even with the
        // staleness check off.
        assert!(decrypt_backup_key(&bundle.rsa_private, &bundle.ecdsa_verifying, &stored).is_err());
    }
}
