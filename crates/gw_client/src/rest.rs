//! Plain HTTPS calls to the relay REST API.
//!
//! Every authenticated call attaches the current access token; a 401 is
//! retried exactly once after a transparent refresh, and a second 401
//! surfaces `AuthExpired`. The refresh endpoint depends on whether this
//! session belongs to a user device or an instance.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, warn};

use gw_proto::api::AccessTokenResponse;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Instance,
}

impl Role {
    fn refresh_path(self) -> &'static str {
        match self {
            Role::User => "/users/access-token",
            Role::Instance => "/instances/access-token",
        }
    }
}

#[derive(Debug)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Shared token pair. Clone to hand to the socket session; all clones see
/// refreshed tokens immediately.
#[derive(Clone)]
pub struct TokenStore {
    role: Role,
    inner: Arc<Mutex<Tokens>>,
}

impl TokenStore {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            inner: Arc::new(Mutex::new(Tokens {
                access: None,
                refresh: None,
            })),
        }
    }

    pub fn with_tokens(role: Role, access_token: String, refresh_token: String) -> Self {
        Self {
            role,
            inner: Arc::new(Mutex::new(Tokens {
                access: Some(access_token),
                refresh: Some(refresh_token),
            })),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.lock().await.access.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.inner.lock().await.refresh.clone()
    }

    pub async fn set_tokens(&self, access_token: String, refresh_token: String) {
        let mut guard = self.inner.lock().await;
        guard.access = Some(access_token);
        guard.refresh = Some(refresh_token);
    }

    async fn set_access_token(&self, access_token: String) {
        self.inner.lock().await.access = Some(access_token);
    }
}

#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
}

impl RestClient {
    pub fn new(config: &GatewayConfig, tokens: TokenStore) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Exchange the refresh token for a fresh access token. A rejection
    /// here is terminal for the session.
    pub async fn refresh_access_token(&self) -> Result<String, GatewayError> {
        let refresh = self
            .tokens
            .refresh_token()
            .await
            .ok_or(GatewayError::AuthExpired)?;

        let resp = self
            .http
            .get(format!("{}{}", self.base_url, self.tokens.role.refresh_path()))
            .header("authorization", refresh)
            .send()
            .await?;

        if !resp.status().is_success() {
            error!(
                target: "gw_client",
                event = "token_refresh_rejected",
                status = %resp.status()
            );
            return Err(GatewayError::AuthExpired);
        }

        let body: AccessTokenResponse = resp.json().await?;
        self.tokens.set_access_token(body.access_token.clone()).await;
        Ok(body.access_token)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            req = req.header("authorization", token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, GatewayError> {
        let token = self.tokens.access_token().await;
        let resp = self
            .send(method.clone(), path, body.as_ref(), token.as_deref())
            .await?;

        // Refresh-and-retry only applies to authenticated calls; a 401 on
        // an unauthenticated endpoint (e.g. a rejected SRP proof) is a
        // plain API error.
        let resp = if resp.status() == StatusCode::UNAUTHORIZED && token.is_some() {
            warn!(target: "gw_client", event = "unauthorized_retry", path = %path);
            let fresh = self.refresh_access_token().await?;
            let retried = self
                .send(method, path, body.as_ref(), Some(&fresh))
                .await?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                return Err(GatewayError::AuthExpired);
            }
            retried
        } else {
            resp
        };

        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        self.request(Method::POST, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        self.request(Method::PATCH, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Upload one chunk to a presigned URL. Not relative to the API base
    /// and not bearer-authenticated; the URL itself is the credential.
    pub async fn put_presigned(&self, url: &str, chunk: Vec<u8>) -> Result<String, GatewayError> {
        let resp = self
            .http
            .put(url)
            .header("content-type", "application/octet-stream")
            .body(chunk)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: Value::String(resp.text().await.unwrap_or_default()),
            });
        }
        let etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        Ok(etag)
    }

    /// Stream a signed download URL into memory.
    pub async fn get_signed(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: Value::String(resp.text().await.unwrap_or_default()),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
