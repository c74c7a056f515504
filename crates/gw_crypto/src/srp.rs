//! SRP-6a client credentials and handshake arithmetic.
//!
//! The relay stores only `{srpSalt, srpVerifier}`; the private key is
//! re-derived from `email:password` with PBKDF2 on every login and never
//! persisted. Identity normalization here MUST match signup exactly or
//! login deterministically fails: email is trimmed and lowercased,
//! password is trimmed.
//!
//! All SRP values travel as hex strings.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use srp::client::{SrpClient, SrpClientVerifier};
use srp::groups::G_2048;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const SRP_KDF_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const EPHEMERAL_LEN: usize = 64;

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn normalize_password(raw: &str) -> String {
    raw.trim().to_string()
}

fn client() -> SrpClient<'static, Sha256> {
    SrpClient::new(&G_2048)
}

pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// `srpPrivateKey = PBKDF2(email:password, srpSalt)`. Ephemeral; zeroized
/// on drop.
pub fn derive_private_key(
    email: &str,
    password: &str,
    salt_hex: &str,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let identity = Zeroizing::new(format!(
        "{}:{}",
        normalize_email(email),
        normalize_password(password)
    ));
    let salt = hex::decode(salt_hex)?;
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(identity.as_bytes(), &salt, SRP_KDF_ITERATIONS, key.as_mut());
    Ok(key)
}

/// Verifier the relay persists at signup. A pure function of the derived
/// private key and the salt.
pub fn derive_verifier(private_key: &[u8], salt_hex: &str) -> Result<String, CryptoError> {
    let salt = hex::decode(salt_hex)?;
    Ok(hex::encode(client().compute_verifier(b"", private_key, &salt)))
}

/// Client ephemeral for round two of the handshake.
pub struct ClientEphemeral {
    secret: Zeroizing<[u8; EPHEMERAL_LEN]>,
    pub public_hex: String,
}

pub fn generate_ephemeral() -> ClientEphemeral {
    let mut secret = Zeroizing::new([0u8; EPHEMERAL_LEN]);
    rand::rngs::OsRng.fill_bytes(secret.as_mut());
    let public_hex = hex::encode(client().compute_public_ephemeral(secret.as_ref()));
    ClientEphemeral {
        secret,
        public_hex,
    }
}

/// The session derived from the server's ephemeral; holds the proof for
/// round three and verifies the server's counter-proof.
pub struct SrpHandshake {
    verifier: SrpClientVerifier<Sha256>,
}

pub fn process_server_ephemeral(
    private_key: &[u8],
    salt_hex: &str,
    ephemeral: &ClientEphemeral,
    server_public_hex: &str,
) -> Result<SrpHandshake, CryptoError> {
    let salt = hex::decode(salt_hex)?;
    let server_public = hex::decode(server_public_hex)?;
    let verifier = client()
        .process_reply(
            ephemeral.secret.as_ref(),
            b"",
            private_key,
            &salt,
            &server_public,
        )
        .map_err(|e| CryptoError::Srp(e.to_string()))?;
    Ok(SrpHandshake { verifier })
}

impl SrpHandshake {
    pub fn client_proof_hex(&self) -> String {
        hex::encode(self.verifier.proof())
    }

    /// Mutual authentication: a mismatching server proof means we are not
    /// talking to the relay that holds the verifier.
    pub fn verify_server(&self, server_proof_hex: &str) -> Result<(), CryptoError> {
        let proof = hex::decode(server_proof_hex)?;
        self.verifier
            .verify_server(&proof)
            .map_err(|_| CryptoError::ServerImpersonation)
    }
}
