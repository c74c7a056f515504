//! Plaintext payload types carried inside the encrypted envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PAYLOAD_VERSION: &str = "1.0";

/// Deserialised plaintext carried inside an envelope ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum E2eePayload {
    /// An API call tunnelled from a user device to the instance.
    #[serde(rename = "gladys-api-call")]
    ApiCall {
        version: String,
        options: ApiCallOptions,
    },
    /// An event pushed from the instance to user devices.
    #[serde(rename = "gladys-event")]
    Event {
        version: String,
        event: String,
        data: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallOptions {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
}

impl E2eePayload {
    /// GET requests carry their body as `query`, everything else as `data`.
    pub fn api_call(method: &str, url: &str, body: Option<Value>) -> Self {
        let method = method.to_uppercase();
        let (data, query) = if method == "GET" {
            (None, body)
        } else {
            (body, None)
        };
        E2eePayload::ApiCall {
            version: PAYLOAD_VERSION.to_string(),
            options: ApiCallOptions {
                url: url.to_string(),
                method,
                data,
                query,
            },
        }
    }

    pub fn event(event: &str, data: Value) -> Self {
        E2eePayload::Event {
            version: PAYLOAD_VERSION.to_string(),
            event: event.to_string(),
            data,
        }
    }
}

/// `status` of a decrypted API response payload, when present.
pub fn response_status(payload: &Value) -> Option<u16> {
    payload
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
}
