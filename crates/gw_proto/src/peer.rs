//! Peer key material as the relay serves it.
//!
//! `rsa_public_key` and `ecdsa_public_key` are JSON *strings* holding JWKs
//! (double-encoded for wire compatibility). They are validated and parsed
//! at this boundary; the raw strings must be kept verbatim alongside the
//! parsed keys because fingerprints are computed over the exact bytes
//! received.

use p256::ecdsa::VerifyingKey;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use gw_crypto::jwk::{self, Jwk};

use crate::error::ProtoError;

/// One peer of an instance, from `GET /instances/users`. On the wire the
/// fields are camelCase: `gladys4UserId`, `rsaPublicKey`, `ecdsaPublicKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUser {
    pub id: String,
    #[serde(default, rename = "gladys4UserId", skip_serializing_if = "Option::is_none")]
    pub gladys_4_user_id: Option<String>,
    #[serde(default)]
    pub connected: bool,
    /// JSON string holding an RSA public JWK.
    pub rsa_public_key: String,
    /// JSON string holding an EC public JWK.
    pub ecdsa_public_key: String,
}

pub fn parse_rsa_public(raw: &str) -> Result<RsaPublicKey, ProtoError> {
    let jwk: Jwk = serde_json::from_str(raw)?;
    Ok(jwk::rsa_public_from_jwk(&jwk)?)
}

pub fn parse_ecdsa_public(raw: &str) -> Result<VerifyingKey, ProtoError> {
    let jwk: Jwk = serde_json::from_str(raw)?;
    Ok(jwk::ecdsa_public_from_jwk(&jwk)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_crypto::KeyBundle;

    #[test]
    fn double_encoded_keys_parse() {
        let bundle = KeyBundle::generate().expect("generate");
        let (rsa_raw, ecdsa_raw) = bundle.public_jwk_strings().expect("export");

        let user = InstanceUser {
            id: "peer-1".into(),
            gladys_4_user_id: Some("g4-1".into()),
            connected: true,
            rsa_public_key: rsa_raw,
            ecdsa_public_key: ecdsa_raw,
        };

        assert!(parse_rsa_public(&user.rsa_public_key).is_ok());
        assert!(parse_ecdsa_public(&user.ecdsa_public_key).is_ok());
    }

    #[test]
    fn garbage_key_json_is_rejected_at_the_boundary() {
        assert!(parse_rsa_public("not json").is_err());
        assert!(parse_ecdsa_public("{\"kty\":\"EC\"}").is_err());
    }

    #[test]
    fn decodes_from_wire_json() {
        let bundle = KeyBundle::generate().expect("generate");
        let (rsa_raw, ecdsa_raw) = bundle.public_jwk_strings().expect("export");

        let fixture = serde_json::json!({
            "id": "peer-1",
            "gladys4UserId": "g4-1",
            "connected": true,
            "rsaPublicKey": rsa_raw,
            "ecdsaPublicKey": ecdsa_raw,
        });
        let user: InstanceUser =
            serde_json::from_value(fixture.clone()).expect("parse wire shape");
        assert_eq!(user.gladys_4_user_id.as_deref(), Some("g4-1"));
        assert_eq!(user.rsa_public_key, rsa_raw);
        assert!(parse_ecdsa_public(&user.ecdsa_public_key).is_ok());

        // Round-trips back to the same field names.
        let encoded = serde_json::to_value(&user).expect("serialise");
        assert_eq!(encoded, fixture);
        assert!(encoded.get("gladys_4_user_id").is_none());
        assert!(encoded.get("rsa_public_key").is_none());
    }
}
