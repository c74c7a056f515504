//! Account flows against the relay: signup, SRP login, two-factor,
//! recovery.
//!
//! The relay never sees a password. Signup uploads an SRP verifier plus
//! the two password-wrapped private keys; login re-derives the SRP private
//! key from `email:password` and proves knowledge without transmitting it.
//! Server-proof verification runs before any token from the response is
//! touched, so an impersonating relay gets nothing back.

use p256::ecdsa::SigningKey;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use tracing::info;

use gw_crypto::{jwk, keys::KeyBundle, srp, vault, CryptoError, KeyAlgorithm};
use gw_proto::api::{
    CreateInstanceRequest, CreateInstanceResponse, EmailVerifyRequest, ForgotPasswordRequest,
    InvitationAcceptRequest, LoginEphemeralRequest, LoginEphemeralResponse, LoginFinalizeRequest,
    LoginFinalizeResponse, LoginSaltRequest, LoginSaltResponse, LoginTokens, ResetPasswordRequest,
    SignupRequest, SignupResponse, TwoFactorRequest, UserResponse,
};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::rest::RestClient;

pub struct SrpAuthenticator {
    rest: RestClient,
    config: GatewayConfig,
}

pub struct SignupOutcome {
    pub response: SignupResponse,
    pub keys: KeyBundle,
    pub srp_salt: String,
}

pub struct LoginSuccess {
    pub access_token: String,
    pub refresh_token: String,
    pub device_id: String,
    pub rsa_private: RsaPrivateKey,
    pub ecdsa_signing: SigningKey,
    /// Public JWK strings exactly as the relay returned them.
    pub rsa_public_key_raw: String,
    pub ecdsa_public_key_raw: String,
    /// `{"rsaPrivateKey": …, "ecdsaPrivateKey": …}` for caller-chosen
    /// storage; the core persists nothing itself.
    pub serialized_keys: String,
}

pub enum LoginOutcome {
    /// The relay wants a TOTP code before handing out tokens.
    TwoFactorRequired { two_factor_token: String },
    Success(Box<LoginSuccess>),
}

impl SrpAuthenticator {
    pub fn new(rest: RestClient, config: GatewayConfig) -> Self {
        Self { rest, config }
    }

    fn account_request(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(SignupRequest, KeyBundle, String), GatewayError> {
        let email = srp::normalize_email(email);
        let srp_salt = srp::generate_salt();
        let private_key = srp::derive_private_key(&email, password, &srp_salt)?;
        let srp_verifier = srp::derive_verifier(private_key.as_ref(), &srp_salt)?;

        let keys = KeyBundle::generate()?;
        let (rsa_public_key, ecdsa_public_key) = keys.public_jwk_strings()?;
        let rsa_encrypted_private_key = vault::wrap(
            password,
            &gw_crypto::PrivateKeyMaterial::Rsa(keys.rsa_private.clone()),
        )?;
        let ecdsa_encrypted_private_key = vault::wrap(
            password,
            &gw_crypto::PrivateKeyMaterial::Ecdsa(keys.ecdsa_signing.clone()),
        )?;

        let request = SignupRequest {
            name: name.to_string(),
            email,
            language: self.config.language.clone(),
            srp_salt: srp_salt.clone(),
            srp_verifier,
            rsa_public_key,
            ecdsa_public_key,
            rsa_encrypted_private_key,
            ecdsa_encrypted_private_key,
        };
        Ok((request, keys, srp_salt))
    }

    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<SignupOutcome, GatewayError> {
        let (request, keys, srp_salt) = self.account_request(name, email, password)?;
        info!(target: "gw_client", event = "signup", email = %request.email);
        let response: SignupResponse = self.rest.post("/users/signup", &request).await?;
        Ok(SignupOutcome {
            response,
            keys,
            srp_salt,
        })
    }

    pub async fn accept_invitation(
        &self,
        token: &str,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<SignupOutcome, GatewayError> {
        let (account, keys, srp_salt) = self.account_request(name, email, password)?;
        let request = InvitationAcceptRequest {
            token: token.to_string(),
            account,
        };
        let response: SignupResponse = self.rest.post("/invitations/accept", &request).await?;
        Ok(SignupOutcome {
            response,
            keys,
            srp_salt,
        })
    }

    pub async fn confirm_email(&self, token: &str) -> Result<UserResponse, GatewayError> {
        self.rest
            .post(
                "/users/verify",
                &EmailVerifyRequest {
                    email_confirmation_token: token.to_string(),
                },
            )
            .await
    }

    /// Three-round SRP login. Returns tokens and unwrapped private keys,
    /// or the pending two-factor challenge.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, GatewayError> {
        let email = srp::normalize_email(email);

        let salt: LoginSaltResponse = self
            .rest
            .post(
                "/users/login-salt",
                &LoginSaltRequest {
                    email: email.clone(),
                },
            )
            .await?;

        let ephemeral = srp::generate_ephemeral();
        let challenge: LoginEphemeralResponse = self
            .rest
            .post(
                "/users/login-generate-ephemeral",
                &LoginEphemeralRequest {
                    email: email.clone(),
                    client_ephemeral_public: ephemeral.public_hex.clone(),
                },
            )
            .await?;

        let private_key = srp::derive_private_key(&email, password, &salt.srp_salt)?;
        let handshake = srp::process_server_ephemeral(
            private_key.as_ref(),
            &salt.srp_salt,
            &ephemeral,
            &challenge.server_ephemeral_public,
        )?;

        let finalize: LoginFinalizeResponse = self
            .rest
            .post(
                "/users/login-finalize",
                &LoginFinalizeRequest {
                    login_session_key: challenge.login_session_key,
                    client_session_proof: handshake.client_proof_hex(),
                },
            )
            .await
            .map_err(|e| match e {
                // A rejected client proof means the password was wrong.
                GatewayError::Api { status: 401, .. } | GatewayError::Api { status: 403, .. } => {
                    GatewayError::Crypto(CryptoError::WrongPassword)
                }
                other => other,
            })?;

        // Authenticate the server before touching anything else in the
        // response.
        handshake.verify_server(&finalize.server_session_proof)?;

        if let Some(two_factor_token) = finalize.two_factor_token.clone() {
            info!(target: "gw_client", event = "login_two_factor_pending");
            return Ok(LoginOutcome::TwoFactorRequired { two_factor_token });
        }

        let tokens = finalize.into_tokens().ok_or(GatewayError::Api {
            status: 500,
            body: json!({"error_code": "INCOMPLETE_LOGIN_RESPONSE"}),
        })?;
        let success = self.complete_login(password, tokens).await?;
        Ok(LoginOutcome::Success(Box::new(success)))
    }

    /// Present the TOTP code for a pending challenge.
    pub async fn login_two_factor(
        &self,
        two_factor_token: &str,
        two_factor_code: &str,
        password: &str,
    ) -> Result<LoginSuccess, GatewayError> {
        let tokens: LoginTokens = self
            .rest
            .post(
                "/users/login-two-factor",
                &TwoFactorRequest {
                    two_factor_token: two_factor_token.to_string(),
                    two_factor_code: two_factor_code.to_string(),
                },
            )
            .await?;
        self.complete_login(password, tokens).await
    }

    async fn complete_login(
        &self,
        password: &str,
        tokens: LoginTokens,
    ) -> Result<LoginSuccess, GatewayError> {
        let rsa_private = vault::unwrap(
            password,
            &tokens.rsa_encrypted_private_key,
            KeyAlgorithm::Rsa,
        )?
        .into_rsa()?;
        let ecdsa_signing = vault::unwrap(
            password,
            &tokens.ecdsa_encrypted_private_key,
            KeyAlgorithm::Ecdsa,
        )?
        .into_ecdsa()?;

        self.rest
            .tokens()
            .set_tokens(tokens.access_token.clone(), tokens.refresh_token.clone())
            .await;

        let serialized_keys = build_serialized_keys(&rsa_private, &ecdsa_signing)?;
        info!(target: "gw_client", event = "login_complete", device_id = %tokens.device_id);

        Ok(LoginSuccess {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            device_id: tokens.device_id,
            rsa_private,
            ecdsa_signing,
            rsa_public_key_raw: tokens.rsa_public_key,
            ecdsa_public_key_raw: tokens.ecdsa_public_key,
            serialized_keys,
        })
    }

    /// Provision an instance: fresh keypairs wrapped under the account
    /// password, registered with the relay. The returned tokens belong to
    /// the instance principal, not the user.
    pub async fn create_instance(
        &self,
        name: &str,
        password: &str,
    ) -> Result<(CreateInstanceResponse, KeyBundle), GatewayError> {
        let keys = KeyBundle::generate()?;
        let (rsa_public_key, ecdsa_public_key) = keys.public_jwk_strings()?;
        let request = CreateInstanceRequest {
            name: name.to_string(),
            rsa_public_key,
            ecdsa_public_key,
            rsa_encrypted_private_key: vault::wrap(
                password,
                &gw_crypto::PrivateKeyMaterial::Rsa(keys.rsa_private.clone()),
            )?,
            ecdsa_encrypted_private_key: vault::wrap(
                password,
                &gw_crypto::PrivateKeyMaterial::Ecdsa(keys.ecdsa_signing.clone()),
            )?,
        };
        let response: CreateInstanceResponse = self.rest.post("/instances", &request).await?;
        Ok((response, keys))
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), GatewayError> {
        let _: Value = self
            .rest
            .post(
                "/users/forgot-password",
                &ForgotPasswordRequest {
                    email: srp::normalize_email(email),
                },
            )
            .await?;
        Ok(())
    }

    /// Recovery replaces the SRP credentials and generates a fresh key
    /// bundle — data encrypted to the old keys is unrecoverable by design.
    pub async fn reset_password(
        &self,
        reset_token: &str,
        email: &str,
        new_password: &str,
    ) -> Result<KeyBundle, GatewayError> {
        let email = srp::normalize_email(email);
        let srp_salt = srp::generate_salt();
        let private_key = srp::derive_private_key(&email, new_password, &srp_salt)?;
        let srp_verifier = srp::derive_verifier(private_key.as_ref(), &srp_salt)?;

        let keys = KeyBundle::generate()?;
        let (rsa_public_key, ecdsa_public_key) = keys.public_jwk_strings()?;
        let request = ResetPasswordRequest {
            reset_token: reset_token.to_string(),
            srp_salt,
            srp_verifier,
            rsa_public_key,
            ecdsa_public_key,
            rsa_encrypted_private_key: vault::wrap(
                new_password,
                &gw_crypto::PrivateKeyMaterial::Rsa(keys.rsa_private.clone()),
            )?,
            ecdsa_encrypted_private_key: vault::wrap(
                new_password,
                &gw_crypto::PrivateKeyMaterial::Ecdsa(keys.ecdsa_signing.clone()),
            )?,
        };
        let _: Value = self.rest.post("/users/reset-password", &request).await?;
        Ok(keys)
    }
}

/// Serialize both private keys for caller-chosen storage.
pub fn build_serialized_keys(
    rsa_private: &RsaPrivateKey,
    ecdsa_signing: &SigningKey,
) -> Result<String, GatewayError> {
    let value = json!({
        "rsaPrivateKey": jwk::rsa_private_to_jwk(rsa_private)?,
        "ecdsaPrivateKey": jwk::ecdsa_private_to_jwk(ecdsa_signing)?,
    });
    Ok(serde_json::to_string(&value)?)
}

/// Rebuild session keys from `serialized_keys` on a returning client.
pub fn parse_serialized_keys(
    serialized: &str,
) -> Result<(RsaPrivateKey, SigningKey), GatewayError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SerializedKeys {
        rsa_private_key: jwk::Jwk,
        ecdsa_private_key: jwk::Jwk,
    }
    let parsed: SerializedKeys = serde_json::from_str(serialized)?;
    Ok((
        jwk::rsa_private_from_jwk(&parsed.rsa_private_key)?,
        jwk::ecdsa_private_from_jwk(&parsed.ecdsa_private_key)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_keys_roundtrip() {
        let bundle = KeyBundle::generate().expect("generate");
        let serialized =
            build_serialized_keys(&bundle.rsa_private, &bundle.ecdsa_signing).expect("serialize");

        let value: Value = serde_json::from_str(&serialized).expect("valid json");
        assert!(value.get("rsaPrivateKey").is_some());
        assert!(value.get("ecdsaPrivateKey").is_some());

        let (rsa, ecdsa) = parse_serialized_keys(&serialized).expect("parse");
        assert_eq!(rsa, bundle.rsa_private);
        assert_eq!(ecdsa.to_bytes(), bundle.ecdsa_signing.to_bytes());
    }
}
