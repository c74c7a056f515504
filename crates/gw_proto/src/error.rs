use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Invalid wire JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] gw_crypto::CryptoError),

    #[error("Unknown socket event: {0}")]
    UnknownEvent(String),
}
