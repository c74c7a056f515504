//! Ecowatt signal cache.
//!
//! The upstream feed is rate-limited, so responses are served from a
//! named 30-minute cache. Eviction is purely time-based; there is no
//! event that invalidates Ecowatt data early.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::GatewayError;
use crate::rest::RestClient;

pub const ECOWATT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[async_trait]
pub trait EcowattSource: Send + Sync {
    async fn fetch_signals(&self) -> Result<Value, GatewayError>;
}

#[async_trait]
impl EcowattSource for RestClient {
    async fn fetch_signals(&self) -> Result<Value, GatewayError> {
        self.get("/ecowatt/v4/signals").await
    }
}

pub struct EcowattCache {
    source: Arc<dyn EcowattSource>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Value)>>,
}

impl EcowattCache {
    pub fn new(source: Arc<dyn EcowattSource>) -> Self {
        Self::with_ttl(source, ECOWATT_CACHE_TTL)
    }

    pub fn with_ttl(source: Arc<dyn EcowattSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub async fn get_signals(&self) -> Result<Value, GatewayError> {
        let mut cached = self.cached.lock().await;
        if let Some((fetched_at, value)) = cached.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                debug!(target: "gw_client", event = "ecowatt_cache_hit");
                return Ok(value.clone());
            }
        }
        let fresh = self.source.fetch_signals().await?;
        *cached = Some((Instant::now(), fresh.clone()));
        Ok(fresh)
    }
}
