use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Wrong password (key unwrap authentication failed)")]
    WrongPassword,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Ciphertext authentication failed (possible tampering)")]
    Tampered,

    #[error("Envelope timestamp outside freshness window")]
    StaleEnvelope,

    #[error("Server session proof verification failed")]
    ServerImpersonation,

    #[error("SRP handshake failed: {0}")]
    Srp(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
