//! REST request/response types shared with the relay.
//! These map directly to JSON bodies on the wire; the relay API is
//! camelCase.

use serde::{Deserialize, Serialize};

use gw_crypto::{Envelope, WrappedKey};

// ── Account ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub language: String,
    pub srp_salt: String,
    pub srp_verifier: String,
    /// JSON string holding the RSA public JWK.
    pub rsa_public_key: String,
    /// JSON string holding the EC public JWK.
    pub ecdsa_public_key: String,
    pub rsa_encrypted_private_key: WrappedKey,
    pub ecdsa_encrypted_private_key: WrappedKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub id: String,
    pub email: String,
}

/// Registration under an invite token carries the same key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationAcceptRequest {
    pub token: String,
    #[serde(flatten)]
    pub account: SignupRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailVerifyRequest {
    pub email_confirmation_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Password reset replaces the SRP credentials and both wrapped keys
/// atomically; the old wrapped keys become garbage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub reset_token: String,
    pub srp_salt: String,
    pub srp_verifier: String,
    pub rsa_public_key: String,
    pub ecdsa_public_key: String,
    pub rsa_encrypted_private_key: WrappedKey,
    pub ecdsa_encrypted_private_key: WrappedKey,
}

// ── SRP login ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSaltRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSaltResponse {
    pub srp_salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginEphemeralRequest {
    pub email: String,
    pub client_ephemeral_public: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginEphemeralResponse {
    pub server_ephemeral_public: String,
    /// Opaque handle tying the proof round to this challenge.
    pub login_session_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginFinalizeRequest {
    pub login_session_key: String,
    pub client_session_proof: String,
}

/// Round three reply: the server proof always, then either a pending
/// two-factor challenge or the full token + key bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginFinalizeResponse {
    pub server_session_proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsa_encrypted_private_key: Option<WrappedKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdsa_encrypted_private_key: Option<WrappedKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsa_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdsa_public_key: Option<String>,
}

impl LoginFinalizeResponse {
    /// The full bundle, present when no two-factor challenge is pending.
    pub fn into_tokens(self) -> Option<LoginTokens> {
        Some(LoginTokens {
            access_token: self.access_token?,
            refresh_token: self.refresh_token?,
            device_id: self.device_id?,
            rsa_encrypted_private_key: self.rsa_encrypted_private_key?,
            ecdsa_encrypted_private_key: self.ecdsa_encrypted_private_key?,
            rsa_public_key: self.rsa_public_key?,
            ecdsa_public_key: self.ecdsa_public_key?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorRequest {
    pub two_factor_token: String,
    pub two_factor_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub device_id: String,
    pub rsa_encrypted_private_key: WrappedKey,
    pub ecdsa_encrypted_private_key: WrappedKey,
    /// JSON strings holding the public JWKs, kept verbatim for
    /// fingerprinting.
    pub rsa_public_key: String,
    pub ecdsa_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Envelope encrypted to the owner's own keys; opaque to the relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_backup_key: Option<Envelope>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_backup_key: Option<Envelope>,
}

// ── Instances ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub name: String,
    pub rsa_public_key: String,
    pub ecdsa_public_key: String,
    pub rsa_encrypted_private_key: WrappedKey,
    pub ecdsa_encrypted_private_key: WrappedKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceResponse {
    pub id: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Documented on the wire as `primary_instance`.
    #[serde(default, rename = "primary_instance")]
    pub primary_instance: bool,
    pub rsa_public_key: String,
    pub ecdsa_public_key: String,
}

// ── Backups ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInitializeRequest {
    pub file_name: String,
    pub parts_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPart {
    pub part_number: u32,
    pub signed_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInitializeResponse {
    pub backup_id: String,
    pub parts: Vec<PresignedPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFinalizeRequest {
    pub backup_id: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupAbortRequest {
    pub backup_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub id: String,
    pub created_at: String,
    pub size: u64,
    pub status: String,
    /// Signed download URL.
    pub path: String,
}

// ── Common ───────────────────────────────────────────────────────────────────

/// Error body shape used by the relay, also the transport-level ack
/// error, which is documented on the wire as `{status, error_code}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status: u16,
    #[serde(rename = "error_code")]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
