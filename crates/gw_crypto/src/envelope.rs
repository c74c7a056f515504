//! Authenticated message envelope — what the relay sees of a message.
//!
//! A fresh AES-256-GCM key per message keeps envelopes independent; the
//! symmetric key rides along RSA-OAEP-wrapped under the recipient's
//! encryption key, and the sender signs `nonce ‖ ciphertext ‖ sentAt`
//! after encrypting, binding its identity to the exact ciphertext.
//!
//! The relay can route this but cannot read it or forge it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::Utc;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Replay window for inbound envelopes, milliseconds either side of now.
pub const FRESHNESS_WINDOW_MS: i64 = 120_000;

const SYM_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// On-wire envelope. All binary fields hex; `sent_at` is sender clock
/// milliseconds since epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub nonce: String,
    pub ciphertext: String,
    pub wrapped_sym_key: String,
    pub signature: String,
    pub sent_at: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecryptOptions {
    /// Skip the freshness window. Only for data that is legitimately old,
    /// e.g. backup keys fetched months after they were wrapped.
    pub disable_timestamp_check: bool,
}

fn signed_bytes(nonce: &[u8], ciphertext: &[u8], sent_at: i64) -> Vec<u8> {
    let stamp = sent_at.to_string();
    let mut out = Vec::with_capacity(nonce.len() + ciphertext.len() + stamp.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(stamp.as_bytes());
    out
}

/// Encrypt `payload` to the recipient and sign as the sender.
pub fn encrypt<P: Serialize>(
    recipient_rsa: &RsaPublicKey,
    sender_ecdsa: &SigningKey,
    payload: &P,
) -> Result<Envelope, CryptoError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);

    let mut sym_key = Zeroizing::new([0u8; SYM_KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(sym_key.as_mut());
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher =
        Aes256Gcm::new_from_slice(sym_key.as_ref()).map_err(|_| CryptoError::Encrypt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| CryptoError::Encrypt)?;

    let wrapped_sym_key = recipient_rsa
        .encrypt(
            &mut rand::rngs::OsRng,
            Oaep::new::<Sha256>(),
            sym_key.as_ref(),
        )
        .map_err(|_| CryptoError::Encrypt)?;

    let sent_at = Utc::now().timestamp_millis();
    let signature: Signature = sender_ecdsa.sign(&signed_bytes(&nonce, &ciphertext, sent_at));

    Ok(Envelope {
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
        wrapped_sym_key: hex::encode(wrapped_sym_key),
        signature: hex::encode(signature.to_bytes()),
        sent_at,
    })
}

/// Verify, freshness-check, unwrap and open an envelope.
///
/// Order matters: the signature is checked before any decryption so a
/// forged envelope never reaches the RSA or AES layer.
pub fn decrypt(
    self_rsa: &RsaPrivateKey,
    sender_ecdsa: &VerifyingKey,
    envelope: &Envelope,
    options: &DecryptOptions,
) -> Result<serde_json::Value, CryptoError> {
    let nonce = hex::decode(&envelope.nonce)?;
    let ciphertext = hex::decode(&envelope.ciphertext)?;
    let signature_bytes = hex::decode(&envelope.signature)?;

    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| CryptoError::BadSignature)?;
    sender_ecdsa
        .verify(
            &signed_bytes(&nonce, &ciphertext, envelope.sent_at),
            &signature,
        )
        .map_err(|_| CryptoError::BadSignature)?;

    if !options.disable_timestamp_check {
        let skew = (Utc::now().timestamp_millis() - envelope.sent_at).abs();
        if skew > FRESHNESS_WINDOW_MS {
            return Err(CryptoError::StaleEnvelope);
        }
    }

    let wrapped = hex::decode(&envelope.wrapped_sym_key)?;
    let sym_key = Zeroizing::new(
        self_rsa
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|_| CryptoError::Tampered)?,
    );
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::Tampered);
    }

    let cipher =
        Aes256Gcm::new_from_slice(sym_key.as_ref()).map_err(|_| CryptoError::Tampered)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| CryptoError::Tampered)?,
    );

    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyBundle;
    use serde_json::json;

    fn pair() -> (KeyBundle, KeyBundle) {
        (
            KeyBundle::generate().expect("sender"),
            KeyBundle::generate().expect("recipient"),
        )
    }

    #[test]
    fn roundtrip() {
        let (sender, recipient) = pair();
        let payload = json!({"version": "1.0", "type": "gladys-event", "data": {"id": "x"}});

        let envelope =
            encrypt(&recipient.rsa_public, &sender.ecdsa_signing, &payload).expect("encrypt");
        let opened = decrypt(
            &recipient.rsa_private,
            &sender.ecdsa_verifying,
            &envelope,
            &DecryptOptions::default(),
        )
        .expect("decrypt");

        assert_eq!(opened, payload);
    }

    #[test]
    fn ciphertext_mutation_is_detected() {
        let (sender, recipient) = pair();
        let mut envelope = encrypt(
            &recipient.rsa_public,
            &sender.ecdsa_signing,
            &json!({"m": 1}),
        )
        .expect("encrypt");

        // Flip one nibble of the ciphertext.
        let mut chars: Vec<char> = envelope.ciphertext.chars().collect();
        chars[0] = if chars[0] == '0' { '1' } else { '0' };
        envelope.ciphertext = chars.into_iter().collect();

        let err = decrypt(
            &recipient.rsa_private,
            &sender.ecdsa_verifying,
            &envelope,
            &DecryptOptions::default(),
        )
        .expect_err("must fail");
        assert!(matches!(
            err,
            CryptoError::BadSignature | CryptoError::Tampered
        ));
    }

    #[test]
    fn nonce_mutation_is_detected() {
        let (sender, recipient) = pair();
        let mut envelope = encrypt(
            &recipient.rsa_public,
            &sender.ecdsa_signing,
            &json!({"m": 1}),
        )
        .expect("encrypt");

        let mut chars: Vec<char> = envelope.nonce.chars().collect();
        chars[0] = if chars[0] == 'f' { 'e' } else { 'f' };
        envelope.nonce = chars.into_iter().collect();

        let err = decrypt(
            &recipient.rsa_private,
            &sender.ecdsa_verifying,
            &envelope,
            &DecryptOptions::default(),
        )
        .expect_err("must fail");
        assert!(matches!(
            err,
            CryptoError::BadSignature | CryptoError::Tampered
        ));
    }

    #[test]
    fn wrong_sender_key_fails_signature() {
        let (sender, recipient) = pair();
        let impostor = KeyBundle::generate().expect("impostor");
        let envelope = encrypt(
            &recipient.rsa_public,
            &sender.ecdsa_signing,
            &json!({"m": 1}),
        )
        .expect("encrypt");

        assert!(matches!(
            decrypt(
                &recipient.rsa_private,
                &impostor.ecdsa_verifying,
                &envelope,
                &DecryptOptions::default(),
            ),
            Err(CryptoError::BadSignature)
        ));
    }

    #[test]
    fn stale_envelope_is_rejected_unless_opted_out() {
        let (sender, recipient) = pair();
        let payload = json!({"m": 1});
        let mut envelope =
            encrypt(&recipient.rsa_public, &sender.ecdsa_signing, &payload).expect("encrypt");

        // Re-stamp five minutes in the past and re-sign so only staleness
        // trips, not the signature.
        let nonce = hex::decode(&envelope.nonce).expect("nonce hex");
        let ciphertext = hex::decode(&envelope.ciphertext).expect("ct hex");
        envelope.sent_at -= 5 * 60 * 1000;
        let signature: Signature =
            sender
                .ecdsa_signing
                .sign(&signed_bytes(&nonce, &ciphertext, envelope.sent_at));
        envelope.signature = hex::encode(signature.to_bytes());

        assert!(matches!(
            decrypt(
                &recipient.rsa_private,
                &sender.ecdsa_verifying,
                &envelope,
                &DecryptOptions::default(),
            ),
            Err(CryptoError::StaleEnvelope)
        ));

        let opened = decrypt(
            &recipient.rsa_private,
            &sender.ecdsa_verifying,
            &envelope,
            &DecryptOptions {
                disable_timestamp_check: true,
            },
        )
        .expect("stale check disabled");
        assert_eq!(opened, payload);
    }

    #[test]
    fn fresh_symmetric_key_per_message() {
        let (sender, recipient) = pair();
        let a = encrypt(&recipient.rsa_public, &sender.ecdsa_signing, &json!({"m": 1}))
            .expect("encrypt");
        let b = encrypt(&recipient.rsa_public, &sender.ecdsa_signing, &json!({"m": 1}))
            .expect("encrypt");
        assert_ne!(a.wrapped_sym_key, b.wrapped_sym_key);
        assert_ne!(a.nonce, b.nonce);
    }
}
