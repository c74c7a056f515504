//! Socket frames exchanged with the relay.
//!
//! The relay routes these by event name; frame bodies are JSON. The relay
//! sees routing identifiers and ciphertext only.

use serde::{Deserialize, Serialize};

use gw_crypto::Envelope;

// Outbound event names.
pub const EVENT_USER_AUTHENTICATION: &str = "user-authentication";
pub const EVENT_INSTANCE_AUTHENTICATION: &str = "instance-authentication";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_LATENCY: &str = "latency";

// Inbound event names.
pub const EVENT_OPEN_API_MESSAGE: &str = "open-api-message";
pub const EVENT_HELLO: &str = "hello";
pub const EVENT_CLEAR_KEY_CACHE: &str = "clear-key-cache";
pub const EVENT_CLEAR_CONNECTED_USERS_LIST: &str = "clear-connected-users-list";
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Reason string the relay uses when it closed the socket itself.
pub const SERVER_DISCONNECT_REASON: &str = "io server disconnect";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationFrame {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationAck {
    #[serde(default)]
    pub authenticated: bool,
}

/// `message` frame. Outbound carries exactly one of `user_id` /
/// `instance_id` as the routing target; inbound carries `sender_id`.
/// The wire shape is deliberately mixed-case: `encryptedMessage` next to
/// snake_case routing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFrame {
    #[serde(rename = "encryptedMessage")]
    pub encrypted_message: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
}

impl MessageFrame {
    pub fn to_instance(instance_id: String, encrypted_message: Envelope, sent_at: i64) -> Self {
        Self {
            encrypted_message,
            user_id: None,
            instance_id: Some(instance_id),
            sender_id: None,
            sent_at: Some(sent_at),
        }
    }

    pub fn to_user(user_id: String, encrypted_message: Envelope) -> Self {
        Self {
            encrypted_message,
            user_id: Some(user_id),
            instance_id: None,
            sender_id: None,
            sent_at: None,
        }
    }
}
