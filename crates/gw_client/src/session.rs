//! Relay socket session: authentication, reconnection, inbound dispatch.
//!
//! One `SocketSession` per connected client. Every piece of shared state
//! is mutated only by the session's own dispatch task; callers interact
//! through the public API and the [`SessionEvent`] stream.
//!
//! Inbound frames are dispatched serially from a single receiver loop, so
//! a `message` handler always finishes decrypting before the next inbound
//! frame for this session reaches the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use p256::ecdsa::{SigningKey, VerifyingKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{info, warn};

use gw_crypto::envelope::{self, DecryptOptions, Envelope};
use gw_proto::api::Instance;
use gw_proto::frames::{
    AuthenticationAck, AuthenticationFrame, MessageFrame, EVENT_INSTANCE_AUTHENTICATION,
    EVENT_USER_AUTHENTICATION, SERVER_DISCONNECT_REASON,
};
use gw_proto::peer::{parse_ecdsa_public, parse_rsa_public};

use crate::directory::PeerDirectory;
use crate::error::GatewayError;
use crate::rest::{RestClient, Role};
use crate::transport::{Ack, Transport, TransportEvent};

/// Control-plane calls the session makes while authenticating. The live
/// implementation is the REST client; tests script one.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn refresh_access_token(&self) -> Result<String, GatewayError>;
    async fn list_instances(&self) -> Result<Vec<Instance>, GatewayError>;
}

#[async_trait]
impl ControlPlane for RestClient {
    async fn refresh_access_token(&self) -> Result<String, GatewayError> {
        RestClient::refresh_access_token(self).await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, GatewayError> {
        self.get("/instances").await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    TransportUp,
    Authenticating,
    Ready,
    Closed,
}

/// This principal's long-term private keys. The signing key is optional:
/// a session restored without it can receive but not send.
pub struct SessionKeys {
    pub rsa_private: RsaPrivateKey,
    pub ecdsa_signing: Option<SigningKey>,
}

/// The single peer of a user session.
#[derive(Clone)]
pub(crate) struct InstanceTarget {
    pub rsa_public: RsaPublicKey,
    pub ecdsa_public: VerifyingKey,
}

/// Decrypted inbound traffic, delivered in arrival order.
pub enum SessionEvent {
    /// Decrypted payload from the peer instance (user session).
    Message { payload: Value },
    /// Decrypted payload from a peer user (instance session), with an
    /// encrypting reply continuation.
    InstanceMessage { payload: Value, responder: Responder },
    /// Third-party frame passed through un-decrypted; ack is plaintext.
    OpenApiMessage { frame: Value, ack: Ack },
    /// A peer came online.
    Hello { frame: Value },
}

/// Encrypts the reply to one inbound instance-side message and acks the
/// sender with the resulting envelope.
pub struct Responder {
    recipient_rsa: RsaPublicKey,
    signing: Option<SigningKey>,
    ack: Ack,
}

impl Responder {
    pub fn respond<P: serde::Serialize>(self, payload: &P) -> Result<(), GatewayError> {
        let signing = self.signing.as_ref().ok_or(GatewayError::NoSigningKey)?;
        let envelope = envelope::encrypt(&self.recipient_rsa, signing, payload)?;
        self.ack.send(serde_json::to_value(envelope)?);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum ClosedReason {
    TokenRejected,
    AuthRejected,
    Caller,
    Transport(String),
}

impl ClosedReason {
    fn to_error(&self) -> GatewayError {
        match self {
            ClosedReason::TokenRejected => GatewayError::AuthExpired,
            ClosedReason::AuthRejected => GatewayError::AuthRejected,
            ClosedReason::Caller => GatewayError::SessionClosed,
            ClosedReason::Transport(msg) => GatewayError::Transport(msg.clone()),
        }
    }
}

pub(crate) struct SessionInner<T: Transport> {
    pub(crate) transport: T,
    control: Arc<dyn ControlPlane>,
    pub(crate) directory: PeerDirectory,
    pub(crate) keys: SessionKeys,
    pub(crate) role: Role,
    pub(crate) instance_id: RwLock<Option<String>>,
    pub(crate) instance_keys: RwLock<Option<InstanceTarget>>,
    state_tx: watch::Sender<SessionState>,
    closed_reason: Mutex<Option<ClosedReason>>,
    ever_ready: AtomicBool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

pub struct SocketSession<T: Transport> {
    pub(crate) inner: Arc<SessionInner<T>>,
}

impl<T: Transport> Clone for SocketSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> SocketSession<T> {
    pub fn new(
        transport: T,
        control: Arc<dyn ControlPlane>,
        directory: PeerDirectory,
        keys: SessionKeys,
        role: Role,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(SessionInner {
                transport,
                control,
                directory,
                keys,
                role,
                instance_id: RwLock::new(None),
                instance_keys: RwLock::new(None),
                state_tx,
                closed_reason: Mutex::new(None),
                ever_ready: AtomicBool::new(false),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Wire a user-device session to the relay REST API.
    pub fn for_user(transport: T, rest: RestClient, keys: SessionKeys) -> Self {
        let directory = PeerDirectory::new(Arc::new(rest.clone()));
        Self::new(transport, Arc::new(rest), directory, keys, Role::User)
    }

    /// Wire an instance session to the relay REST API.
    pub fn for_instance(transport: T, rest: RestClient, keys: SessionKeys) -> Self {
        let directory = PeerDirectory::new(Arc::new(rest.clone()));
        Self::new(transport, Arc::new(rest), directory, keys, Role::Instance)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions, e.g. to await `Ready` after a reconnect.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// The decrypted inbound stream. Can be taken once.
    pub async fn events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.inner.events_rx.lock().await.take()
    }

    pub fn peer_directory(&self) -> &PeerDirectory {
        &self.inner.directory
    }

    /// Open the transport, authenticate and start dispatching. Resolves
    /// once the session is `Ready`; a closed session resolves to the
    /// closing error.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        self.inner.set_state(SessionState::Connecting);
        let rx = self.inner.transport.connect().await?;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            dispatch_loop(inner, rx).await;
        });

        self.await_ready().await
    }

    async fn await_ready(&self) -> Result<(), GatewayError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        loop {
            match *state_rx.borrow_and_update() {
                SessionState::Ready => return Ok(()),
                SessionState::Closed => return Err(self.inner.close_error().await),
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(GatewayError::SessionClosed);
            }
        }
    }

    /// Caller-initiated shutdown. Pending requests reject with
    /// `SessionClosed` from here on.
    pub async fn disconnect(&self) {
        self.inner.close_with(ClosedReason::Caller).await;
    }
}

impl<T: Transport> SessionInner<T> {
    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }

    pub(crate) fn current_state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    async fn close_with(&self, reason: ClosedReason) {
        {
            let mut guard = self.closed_reason.lock().await;
            guard.get_or_insert(reason);
        }
        self.set_state(SessionState::Closed);
        if let Err(e) = self.transport.close().await {
            warn!(target: "gw_client", event = "transport_close_failed", error = %e);
        }
    }

    async fn close_error(&self) -> GatewayError {
        self.closed_reason
            .lock()
            .await
            .as_ref()
            .map(ClosedReason::to_error)
            .unwrap_or(GatewayError::SessionClosed)
    }

    /// Map an emit failure on a session the caller already closed to
    /// `SessionClosed`.
    pub(crate) fn map_emit_error(&self, error: GatewayError) -> GatewayError {
        if self.current_state() == SessionState::Closed {
            GatewayError::SessionClosed
        } else {
            error
        }
    }

    async fn authenticate(&self) {
        self.set_state(SessionState::TransportUp);

        let access_token = match self.control.refresh_access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(target: "gw_client", event = "token_refresh_failed", error = %e);
                self.close_with(ClosedReason::TokenRejected).await;
                return;
            }
        };

        match self.role {
            Role::User => self.fetch_primary_instance().await,
            Role::Instance => {
                if let Err(e) = self.directory.refresh().await {
                    warn!(target: "gw_client", event = "peer_refresh_failed", error = %e);
                }
            }
        }

        self.set_state(SessionState::Authenticating);
        let event = match self.role {
            Role::User => EVENT_USER_AUTHENTICATION,
            Role::Instance => EVENT_INSTANCE_AUTHENTICATION,
        };
        let frame = AuthenticationFrame { access_token };
        let payload = match serde_json::to_value(&frame) {
            Ok(v) => v,
            Err(e) => {
                self.close_with(ClosedReason::Transport(e.to_string())).await;
                return;
            }
        };

        match self.transport.emit_with_ack(event, payload).await {
            Ok(ack) => {
                let ack: AuthenticationAck = serde_json::from_value(ack).unwrap_or(
                    AuthenticationAck {
                        authenticated: false,
                    },
                );
                if ack.authenticated {
                    info!(target: "gw_client", event = "session_ready");
                    self.ever_ready.store(true, Ordering::SeqCst);
                    self.set_state(SessionState::Ready);
                } else {
                    self.close_with(ClosedReason::AuthRejected).await;
                }
            }
            Err(e) => {
                if self.ever_ready.load(Ordering::SeqCst) {
                    // Mid-session reconnect: the transport keeps retrying,
                    // the next Connected event re-runs authentication.
                    warn!(target: "gw_client", event = "reauth_emit_failed", error = %e);
                    self.set_state(SessionState::Connecting);
                } else {
                    self.close_with(ClosedReason::Transport(e.to_string())).await;
                }
            }
        }
    }

    /// Populate the peer-instance keys for a user session. A user without
    /// an instance yet stays connected; request paths surface
    /// `NoInstance` on use.
    async fn fetch_primary_instance(&self) {
        let instances = match self.control.list_instances().await {
            Ok(list) => list,
            Err(e) => {
                warn!(target: "gw_client", event = "instance_fetch_failed", error = %e);
                return;
            }
        };
        let Some(primary) = instances.into_iter().find(|i| i.primary_instance) else {
            warn!(target: "gw_client", event = "no_primary_instance");
            return;
        };
        let parsed = parse_rsa_public(&primary.rsa_public_key)
            .and_then(|rsa| Ok((rsa, parse_ecdsa_public(&primary.ecdsa_public_key)?)));
        match parsed {
            Ok((rsa_public, ecdsa_public)) => {
                *self.instance_id.write().await = Some(primary.id);
                *self.instance_keys.write().await = Some(InstanceTarget {
                    rsa_public,
                    ecdsa_public,
                });
            }
            Err(e) => {
                warn!(
                    target: "gw_client",
                    event = "instance_key_rejected",
                    instance_id = %primary.id,
                    error = %e
                );
            }
        }
    }

    async fn handle_message(&self, frame: Value, ack: Ack) {
        let frame: MessageFrame = match serde_json::from_value(frame) {
            Ok(f) => f,
            Err(e) => {
                warn!(target: "gw_client", event = "malformed_message_frame", error = %e);
                return;
            }
        };

        match self.role {
            Role::User => self.handle_user_message(frame.encrypted_message).await,
            Role::Instance => {
                self.handle_instance_message(frame.encrypted_message, frame.sender_id, ack)
                    .await
            }
        }
    }

    async fn handle_user_message(&self, envelope: Envelope) {
        let Some(instance) = self.instance_keys.read().await.clone() else {
            warn!(target: "gw_client", event = "message_without_instance_keys");
            return;
        };
        match envelope::decrypt(
            &self.keys.rsa_private,
            &instance.ecdsa_public,
            &envelope,
            &DecryptOptions::default(),
        ) {
            Ok(payload) => {
                let _ = self.events_tx.send(SessionEvent::Message { payload });
            }
            Err(e) => {
                // Never deliver a frame that failed validation.
                warn!(target: "gw_client", event = "message_decrypt_failed", error = %e);
            }
        }
    }

    async fn handle_instance_message(
        &self,
        envelope: Envelope,
        sender_id: Option<String>,
        ack: Ack,
    ) {
        let Some(sender_id) = sender_id else {
            warn!(target: "gw_client", event = "message_without_sender");
            return;
        };
        // The directory refresh completes before decryption is attempted.
        let entry = match self.directory.resolve(&sender_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(target: "gw_client", event = "unknown_sender", sender_id = %sender_id);
                return;
            }
            Err(e) => {
                warn!(target: "gw_client", event = "sender_resolve_failed", error = %e);
                return;
            }
        };

        match envelope::decrypt(
            &self.keys.rsa_private,
            &entry.ecdsa_public_key,
            &envelope,
            &DecryptOptions::default(),
        ) {
            Ok(payload) => {
                let responder = Responder {
                    recipient_rsa: entry.rsa_public_key.clone(),
                    signing: self.keys.ecdsa_signing.clone(),
                    ack,
                };
                let _ = self
                    .events_tx
                    .send(SessionEvent::InstanceMessage { payload, responder });
            }
            Err(e) => {
                warn!(
                    target: "gw_client",
                    event = "message_decrypt_failed",
                    sender_id = %sender_id,
                    error = %e
                );
            }
        }
    }

    async fn handle_clear_key_cache(&self) {
        match self.role {
            Role::User => {
                // The user's only peer is the instance; refetch its keys.
                *self.instance_keys.write().await = None;
                self.fetch_primary_instance().await;
            }
            Role::Instance => {
                self.directory.clear().await;
                if let Err(e) = self.directory.refresh().await {
                    warn!(target: "gw_client", event = "peer_refresh_failed", error = %e);
                }
            }
        }
    }

    async fn handle_disconnect(&self, reason: String) {
        info!(target: "gw_client", event = "socket_disconnected", reason = %reason);
        self.set_state(SessionState::Connecting);
        if reason == SERVER_DISCONNECT_REASON {
            // The server hung up on purpose; the transport will not retry
            // by itself.
            if let Err(e) = self.transport.reconnect().await {
                warn!(target: "gw_client", event = "reconnect_failed", error = %e);
            }
        }
    }
}

async fn dispatch_loop<T: Transport>(
    inner: Arc<SessionInner<T>>,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = rx.recv().await {
        if inner.current_state() == SessionState::Closed {
            break;
        }
        match event {
            TransportEvent::Connected => inner.authenticate().await,
            TransportEvent::Message { frame, ack } => inner.handle_message(frame, ack).await,
            TransportEvent::OpenApiMessage { frame, ack } => {
                // Counter-party is a third party without our keys; pass
                // through un-decrypted.
                let _ = inner
                    .events_tx
                    .send(SessionEvent::OpenApiMessage { frame, ack });
            }
            TransportEvent::Hello { frame } => {
                let _ = inner.events_tx.send(SessionEvent::Hello { frame });
            }
            TransportEvent::ClearKeyCache => inner.handle_clear_key_cache().await,
            TransportEvent::ClearConnectedUsersList => {
                if let Err(e) = inner.directory.refresh().await {
                    warn!(target: "gw_client", event = "peer_refresh_failed", error = %e);
                }
            }
            TransportEvent::Disconnect { reason } => inner.handle_disconnect(reason).await,
        }
    }
}
