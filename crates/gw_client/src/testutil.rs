//! Shared scaffolding for session and router tests: scripted transport,
//! control plane and peer sources wired into a ready-to-connect session.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use gw_crypto::KeyBundle;
use gw_proto::api::Instance;
use gw_proto::peer::InstanceUser;

use crate::directory::tests::ScriptedPeers;
use crate::directory::PeerDirectory;
use crate::error::GatewayError;
use crate::rest::Role;
use crate::session::{
    ControlPlane, SessionEvent, SessionKeys, SessionState, SocketSession,
};
use crate::transport::MockTransport;

pub(crate) struct FakeControl {
    pub refreshes: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub instances: StdMutex<Vec<Instance>>,
}

impl FakeControl {
    pub fn new(instances: Vec<Instance>) -> Arc<Self> {
        Arc::new(Self {
            refreshes: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
            instances: StdMutex::new(instances),
        })
    }
}

#[async_trait]
impl ControlPlane for FakeControl {
    async fn refresh_access_token(&self) -> Result<String, GatewayError> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(GatewayError::AuthExpired);
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(format!("token-{n}"))
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, GatewayError> {
        Ok(self.instances.lock().expect("poisoned").clone())
    }
}

pub(crate) fn instance_of(bundle: &KeyBundle, id: &str) -> Instance {
    let (rsa, ecdsa) = bundle.public_jwk_strings().expect("export");
    Instance {
        id: id.to_string(),
        name: "home".into(),
        primary_instance: true,
        rsa_public_key: rsa,
        ecdsa_public_key: ecdsa,
    }
}

pub(crate) fn peer_user(
    bundle: &KeyBundle,
    id: &str,
    gladys_4: Option<&str>,
    connected: bool,
) -> InstanceUser {
    let (rsa, ecdsa) = bundle.public_jwk_strings().expect("export");
    InstanceUser {
        id: id.to_string(),
        gladys_4_user_id: gladys_4.map(str::to_string),
        connected,
        rsa_public_key: rsa,
        ecdsa_public_key: ecdsa,
    }
}

pub(crate) fn session_keys(bundle: &KeyBundle) -> SessionKeys {
    SessionKeys {
        rsa_private: bundle.rsa_private.clone(),
        ecdsa_signing: Some(bundle.ecdsa_signing.clone()),
    }
}

pub(crate) struct TestRig {
    pub transport: Arc<MockTransport>,
    pub control: Arc<FakeControl>,
    pub peers: Arc<ScriptedPeers>,
    pub session: SocketSession<Arc<MockTransport>>,
}

pub(crate) async fn user_rig(user: &KeyBundle, instance: &KeyBundle) -> TestRig {
    let transport = MockTransport::new();
    transport
        .on_ack("user-authentication", |_| Ok(json!({"authenticated": true})))
        .await;
    let control = FakeControl::new(vec![instance_of(instance, "inst-1")]);
    let peers = ScriptedPeers::new(vec![]);
    let session = SocketSession::new(
        transport.clone(),
        control.clone(),
        PeerDirectory::new(peers.clone()),
        session_keys(user),
        Role::User,
    );
    TestRig {
        transport,
        control,
        peers,
        session,
    }
}

pub(crate) async fn instance_rig(
    instance: &KeyBundle,
    peer_users: Vec<InstanceUser>,
) -> TestRig {
    let transport = MockTransport::new();
    transport
        .on_ack("instance-authentication", |_| {
            Ok(json!({"authenticated": true}))
        })
        .await;
    let control = FakeControl::new(vec![]);
    let peers = ScriptedPeers::new(peer_users);
    let session = SocketSession::new(
        transport.clone(),
        control.clone(),
        PeerDirectory::new(peers.clone()),
        session_keys(instance),
        Role::Instance,
    );
    TestRig {
        transport,
        control,
        peers,
        session,
    }
}

pub(crate) async fn recv_event(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no event within 2s")
        .expect("event stream ended")
}

pub(crate) async fn expect_no_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected event delivered");
}

pub(crate) async fn wait_for_state(
    session: &SocketSession<Arc<MockTransport>>,
    target: SessionState,
) {
    let mut watch = session.state_watch();
    let wait = async {
        loop {
            if *watch.borrow_and_update() == target {
                return;
            }
            if watch.changed().await.is_err() {
                panic!("state channel closed before reaching {target:?}");
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .unwrap_or_else(|_| panic!("never reached state {target:?}"));
}
