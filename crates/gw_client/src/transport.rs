//! Socket transport contract.
//!
//! The underlying socket implementation (reconnection, heartbeats, wire
//! framing) is an external collaborator; the session only needs emit,
//! emit-with-ack and an inbound event stream. The transport ack is the
//! only request/response correlation mechanism — there is no request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::GatewayError;

/// Inbound events as the session sees them. Frames that expect a reply
/// carry an [`Ack`].
pub enum TransportEvent {
    /// Transport established (also after an internal reconnect). The
    /// session must re-authenticate on every one of these.
    Connected,
    Message { frame: Value, ack: Ack },
    OpenApiMessage { frame: Value, ack: Ack },
    Hello { frame: Value },
    ClearKeyCache,
    ClearConnectedUsersList,
    Disconnect { reason: String },
}

/// One-shot reply channel for an inbound frame. Dropping it without
/// sending is fine; the relay treats a missing ack as a timeout.
pub struct Ack(Option<oneshot::Sender<Value>>);

impl Ack {
    pub fn new(sender: oneshot::Sender<Value>) -> Self {
        Self(Some(sender))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn send(mut self, value: Value) {
        if let Some(sender) = self.0.take() {
            let _ = sender.send(value);
        }
    }
}

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0.is_some() { "Ack" } else { "Ack(none)" })
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the socket and hand back the inbound event stream. The
    /// first `Connected` is delivered on the stream; later internal
    /// reconnects deliver further `Connected` events on the same stream.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, GatewayError>;

    /// Re-establish after a server-initiated disconnect. Events continue
    /// on the stream `connect` returned.
    async fn reconnect(&self) -> Result<(), GatewayError>;

    async fn emit(&self, event: &str, payload: Value) -> Result<(), GatewayError>;

    /// Emit and await the relay's ack for this frame.
    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value, GatewayError>;

    async fn close(&self) -> Result<(), GatewayError>;
}

type AckHandler = Box<dyn Fn(&Value) -> Result<Value, GatewayError> + Send + Sync>;

/// Scripted transport for tests: acks are served by registered handlers,
/// inbound frames are injected by the test.
#[derive(Default)]
pub struct MockTransport {
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    ack_handlers: Mutex<HashMap<String, AckHandler>>,
    emitted: Mutex<Vec<(String, Value)>>,
    connects: AtomicUsize,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the ack for an event name.
    pub async fn on_ack<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, GatewayError> + Send + Sync + 'static,
    {
        self.ack_handlers
            .lock()
            .await
            .insert(event.to_string(), Box::new(handler));
    }

    /// Push an inbound event to the session.
    pub async fn inject(&self, event: TransportEvent) {
        let guard = self.events_tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(event);
        }
    }

    pub async fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().await.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Arc<MockTransport> {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, GatewayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Connected);
        *self.events_tx.lock().await = Some(tx);
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        Ok(rx)
    }

    async fn reconnect(&self) -> Result<(), GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let guard = self.events_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| GatewayError::Transport("reconnect before connect".into()))?;
        tx.send(TransportEvent::Connected)
            .map_err(|_| GatewayError::Transport("event stream dropped".into()))
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::Transport("socket closed".into()));
        }
        self.emitted
            .lock()
            .await
            .push((event.to_string(), payload));
        Ok(())
    }

    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value, GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::Transport("socket closed".into()));
        }
        self.emitted
            .lock()
            .await
            .push((event.to_string(), payload.clone()));
        let handlers = self.ack_handlers.lock().await;
        match handlers.get(event) {
            Some(handler) => handler(&payload),
            None => Err(GatewayError::Transport(format!(
                "no ack scripted for `{event}`"
            ))),
        }
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender ends the event stream.
        *self.events_tx.lock().await = None;
        Ok(())
    }
}
