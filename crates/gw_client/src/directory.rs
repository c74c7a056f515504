//! Client-side cache of peer public keys and presence.
//!
//! Keys enter the cache parsed, but the raw JWK strings are kept verbatim
//! so upper layers can compute stable fingerprints. A refresh never
//! evicts — only the `clear-key-cache` event does, via `clear()` — and a
//! refresh of an already-cached peer touches nothing but the `connected`
//! flag.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use p256::ecdsa::VerifyingKey;
use rsa::RsaPublicKey;
use tokio::sync::RwLock;
use tracing::warn;

use gw_proto::peer::{parse_ecdsa_public, parse_rsa_public, InstanceUser};

use crate::error::GatewayError;
use crate::rest::RestClient;

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: String,
    pub gladys_4_user_id: Option<String>,
    pub connected: bool,
    pub rsa_public_key: RsaPublicKey,
    pub ecdsa_public_key: VerifyingKey,
    pub rsa_public_key_raw: String,
    pub ecdsa_public_key_raw: String,
}

/// Where the authoritative peer list comes from. The live implementation
/// is the relay REST API; tests substitute a scripted source.
#[async_trait]
pub trait PeerSource: Send + Sync {
    async fn fetch_peers(&self) -> Result<Vec<InstanceUser>, GatewayError>;
}

#[async_trait]
impl PeerSource for RestClient {
    async fn fetch_peers(&self) -> Result<Vec<InstanceUser>, GatewayError> {
        self.get("/instances/users").await
    }
}

#[derive(Clone)]
pub struct PeerDirectory {
    source: Arc<dyn PeerSource>,
    entries: Arc<RwLock<HashMap<String, PeerEntry>>>,
}

impl PeerDirectory {
    pub fn new(source: Arc<dyn PeerSource>) -> Self {
        Self {
            source,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, id: &str) -> Option<PeerEntry> {
        self.entries.read().await.get(id).cloned()
    }

    /// Fetch the authoritative list and merge it in. Idempotent;
    /// concurrent refreshes are allowed, later write wins per key.
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let users = self.source.fetch_peers().await?;
        let mut entries = self.entries.write().await;
        for user in users {
            match entries.get_mut(&user.id) {
                Some(entry) => {
                    entry.connected = user.connected;
                }
                None => {
                    let rsa_public_key = match parse_rsa_public(&user.rsa_public_key) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(
                                target: "gw_client",
                                event = "peer_key_rejected",
                                peer_id = %user.id,
                                error = %e
                            );
                            continue;
                        }
                    };
                    let ecdsa_public_key = match parse_ecdsa_public(&user.ecdsa_public_key) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(
                                target: "gw_client",
                                event = "peer_key_rejected",
                                peer_id = %user.id,
                                error = %e
                            );
                            continue;
                        }
                    };
                    entries.insert(
                        user.id.clone(),
                        PeerEntry {
                            id: user.id,
                            gladys_4_user_id: user.gladys_4_user_id,
                            connected: user.connected,
                            rsa_public_key,
                            ecdsa_public_key,
                            rsa_public_key_raw: user.rsa_public_key,
                            ecdsa_public_key_raw: user.ecdsa_public_key,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Drop every entry. Response to the `clear-key-cache` event.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Lookup with a single refresh on miss. `None` after the refresh
    /// means the peer genuinely does not exist on the relay.
    pub async fn resolve(&self, id: &str) -> Result<Option<PeerEntry>, GatewayError> {
        if let Some(entry) = self.get(id).await {
            return Ok(Some(entry));
        }
        self.refresh().await?;
        Ok(self.get(id).await)
    }

    pub async fn find_by_gladys_4_user_id(
        &self,
        gladys_4_user_id: &str,
    ) -> Result<Option<PeerEntry>, GatewayError> {
        if let Some(entry) = self.scan_gladys_4(gladys_4_user_id).await {
            return Ok(Some(entry));
        }
        self.refresh().await?;
        Ok(self.scan_gladys_4(gladys_4_user_id).await)
    }

    async fn scan_gladys_4(&self, gladys_4_user_id: &str) -> Option<PeerEntry> {
        self.entries
            .read()
            .await
            .values()
            .find(|entry| entry.gladys_4_user_id.as_deref() == Some(gladys_4_user_id))
            .cloned()
    }

    pub async fn connected_peers(&self) -> Vec<PeerEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.connected)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use gw_crypto::KeyBundle;

    /// Scripted peer source counting how many times it was hit.
    pub(crate) struct ScriptedPeers {
        pub users: std::sync::Mutex<Vec<InstanceUser>>,
        pub fetches: AtomicUsize,
    }

    impl ScriptedPeers {
        pub fn new(users: Vec<InstanceUser>) -> Arc<Self> {
            Arc::new(Self {
                users: std::sync::Mutex::new(users),
                fetches: AtomicUsize::new(0),
            })
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeerSource for ScriptedPeers {
        async fn fetch_peers(&self) -> Result<Vec<InstanceUser>, GatewayError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.lock().expect("poisoned").clone())
        }
    }

    pub(crate) fn user(id: &str, gladys_4: Option<&str>, connected: bool) -> InstanceUser {
        let bundle = KeyBundle::generate().expect("generate");
        let (rsa, ecdsa) = bundle.public_jwk_strings().expect("export");
        InstanceUser {
            id: id.to_string(),
            gladys_4_user_id: gladys_4.map(str::to_string),
            connected,
            rsa_public_key: rsa,
            ecdsa_public_key: ecdsa,
        }
    }

    #[tokio::test]
    async fn refresh_inserts_and_updates_connected_only() {
        let source = ScriptedPeers::new(vec![user("p1", Some("g1"), true)]);
        let directory = PeerDirectory::new(source.clone());

        directory.refresh().await.expect("refresh");
        let first = directory.get("p1").await.expect("cached");
        assert!(first.connected);

        // Same peer comes back disconnected with *different* keys; only
        // the flag may change.
        let mut updated = user("p1", Some("g1"), false);
        updated.rsa_public_key = user("other", None, true).rsa_public_key;
        *source.users.lock().expect("poisoned") = vec![updated];

        directory.refresh().await.expect("refresh");
        let second = directory.get("p1").await.expect("still cached");
        assert!(!second.connected);
        assert_eq!(second.rsa_public_key_raw, first.rsa_public_key_raw);
    }

    #[tokio::test]
    async fn resolve_refreshes_exactly_once_on_miss() {
        let source = ScriptedPeers::new(vec![user("p1", None, true)]);
        let directory = PeerDirectory::new(source.clone());

        let entry = directory.resolve("p1").await.expect("resolve");
        assert!(entry.is_some());
        assert_eq!(source.fetch_count(), 1);

        // Now cached: no further fetch.
        let again = directory.resolve("p1").await.expect("resolve");
        assert!(again.is_some());
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn resolve_of_absent_peer_fetches_and_returns_none() {
        let source = ScriptedPeers::new(vec![]);
        let directory = PeerDirectory::new(source.clone());

        assert!(directory.resolve("ghost").await.expect("resolve").is_none());
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn clear_then_refresh_reparses_keys() {
        let source = ScriptedPeers::new(vec![user("p1", None, true)]);
        let directory = PeerDirectory::new(source.clone());
        directory.refresh().await.expect("refresh");
        let before = directory.get("p1").await.expect("cached");

        // Peer rotated keys; clear-key-cache drops everything so the next
        // refresh picks up the new material.
        *source.users.lock().expect("poisoned") = vec![user("p1", None, true)];
        directory.clear().await;
        assert!(directory.get("p1").await.is_none());

        directory.refresh().await.expect("refresh");
        let after = directory.get("p1").await.expect("cached");
        assert_ne!(before.rsa_public_key_raw, after.rsa_public_key_raw);
    }

    #[tokio::test]
    async fn find_by_gladys_4_user_id_scans_then_refreshes() {
        let source = ScriptedPeers::new(vec![user("p1", Some("g1"), true)]);
        let directory = PeerDirectory::new(source.clone());

        let found = directory
            .find_by_gladys_4_user_id("g1")
            .await
            .expect("find");
        assert_eq!(found.expect("present").id, "p1");
        assert_eq!(source.fetch_count(), 1);

        let missing = directory
            .find_by_gladys_4_user_id("g2")
            .await
            .expect("find");
        assert!(missing.is_none());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn malformed_peer_keys_are_skipped() {
        let mut bad = user("bad", None, true);
        bad.rsa_public_key = "not json".into();
        let source = ScriptedPeers::new(vec![bad, user("good", None, true)]);
        let directory = PeerDirectory::new(source);

        directory.refresh().await.expect("refresh");
        assert!(directory.get("bad").await.is_none());
        assert!(directory.get("good").await.is_some());
    }
}
