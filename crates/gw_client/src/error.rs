use serde_json::Value;
use thiserror::Error;

use gw_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Two-factor challenge pending")]
    TwoFactorRequired { two_factor_token: String },

    #[error("Refresh token rejected")]
    AuthExpired,

    #[error("Authentication rejected by the relay")]
    AuthRejected,

    #[error("Session is closed")]
    SessionClosed,

    #[error("No primary instance available")]
    NoInstance,

    #[error("Session has no instance id")]
    NoInstanceId,

    #[error("Session has no signing key")]
    NoSigningKey,

    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("Recipient is not connected: {0}")]
    Undelivered(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: Value },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("HTTP failure: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Proto(#[from] gw_proto::ProtoError),
}
