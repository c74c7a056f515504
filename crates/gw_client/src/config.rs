use serde::{Deserialize, Serialize};

pub const GLADYS_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the relay REST API.
    pub server_url: String,
    /// Sent on every external call.
    pub user_agent: String,
    /// Interface language sent at signup.
    pub language: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_url: "https://api.gladysgateway.com".into(),
            user_agent: format!("Gladys/{GLADYS_VERSION}"),
            language: "en".into(),
        }
    }
}
