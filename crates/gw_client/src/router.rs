//! Request/response over fire-and-forget encrypted messages.
//!
//! The transport ack is the only correlation mechanism: each outbound
//! `message` frame carries an ack continuation, and the peer's reply —
//! a transport-level error or an encrypted envelope — comes back on it.
//! Correlators live in the transport, so in-flight requests survive a
//! reconnect until their own timeout.

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use gw_crypto::envelope::{self, DecryptOptions, Envelope};
use gw_proto::frames::{MessageFrame, EVENT_LATENCY, EVENT_MESSAGE};
use gw_proto::payload::{response_status, E2eePayload};

use crate::error::GatewayError;
use crate::session::{SessionState, SocketSession};
use crate::transport::Transport;

impl<T: Transport> SocketSession<T> {
    /// Tunnel one API call to the instance and await its decrypted
    /// response.
    pub async fn send_request_to_instance(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        if self.state() == SessionState::Closed {
            return Err(GatewayError::SessionClosed);
        }
        let instance_id = self
            .inner
            .instance_id
            .read()
            .await
            .clone()
            .ok_or(GatewayError::NoInstanceId)?;
        let instance = self
            .inner
            .instance_keys
            .read()
            .await
            .clone()
            .ok_or(GatewayError::NoInstance)?;
        let signing = self
            .inner
            .keys
            .ecdsa_signing
            .as_ref()
            .ok_or(GatewayError::NoSigningKey)?;

        let payload = E2eePayload::api_call(method, path, body);
        let encrypted = envelope::encrypt(&instance.rsa_public, signing, &payload)?;
        let frame = MessageFrame::to_instance(
            instance_id,
            encrypted,
            Utc::now().timestamp_millis(),
        );

        let ack = self
            .inner
            .transport
            .emit_with_ack(EVENT_MESSAGE, serde_json::to_value(&frame)?)
            .await
            .map_err(|e| self.inner.map_emit_error(e))?;

        // A transport-level error ack `{status, error_code}` carries no
        // ciphertext; reject it as-is.
        if ack.get("ciphertext").is_none() {
            let status = response_status(&ack).unwrap_or(500);
            return Err(GatewayError::Api { status, body: ack });
        }

        let envelope: Envelope = serde_json::from_value(ack)?;
        let response = envelope::decrypt(
            &self.inner.keys.rsa_private,
            &instance.ecdsa_public,
            &envelope,
            &DecryptOptions::default(),
        )?;

        if let Some(status) = response_status(&response) {
            if status >= 400 {
                return Err(GatewayError::Api {
                    status,
                    body: response,
                });
            }
        }
        Ok(response)
    }

    pub async fn send_request_get(
        &self,
        path: &str,
        query: Option<Value>,
    ) -> Result<Value, GatewayError> {
        self.send_request_to_instance("GET", path, query).await
    }

    pub async fn send_request_post(
        &self,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        self.send_request_to_instance("POST", path, body).await
    }

    pub async fn send_request_patch(
        &self,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        self.send_request_to_instance("PATCH", path, body).await
    }

    pub async fn send_request_delete(&self, path: &str) -> Result<Value, GatewayError> {
        self.send_request_to_instance("DELETE", path, None).await
    }

    /// Encrypt `payload` to one peer user and emit it. An offline peer is
    /// a distinguishable `Undelivered` outcome, not a silent success.
    pub async fn send_message_to_user(
        &self,
        gladys_4_user_id: &str,
        payload: &Value,
    ) -> Result<(), GatewayError> {
        if self.state() == SessionState::Closed {
            return Err(GatewayError::SessionClosed);
        }
        let signing = self
            .inner
            .keys
            .ecdsa_signing
            .as_ref()
            .ok_or(GatewayError::NoSigningKey)?;
        let entry = self
            .inner
            .directory
            .find_by_gladys_4_user_id(gladys_4_user_id)
            .await?
            .ok_or_else(|| GatewayError::UnknownRecipient(gladys_4_user_id.to_string()))?;
        if !entry.connected {
            return Err(GatewayError::Undelivered(gladys_4_user_id.to_string()));
        }

        let encrypted = envelope::encrypt(&entry.rsa_public_key, signing, payload)?;
        let frame = MessageFrame::to_user(entry.id, encrypted);
        self.inner
            .transport
            .emit(EVENT_MESSAGE, serde_json::to_value(&frame)?)
            .await
            .map_err(|e| self.inner.map_emit_error(e))
    }

    /// Best-effort broadcast: one frame per connected peer, no ack
    /// awaited. Returns how many frames went out.
    pub async fn send_message_all_users(&self, payload: &Value) -> Result<usize, GatewayError> {
        if self.state() == SessionState::Closed {
            return Err(GatewayError::SessionClosed);
        }
        let signing = self
            .inner
            .keys
            .ecdsa_signing
            .as_ref()
            .ok_or(GatewayError::NoSigningKey)?;

        let mut sent = 0;
        for entry in self.inner.directory.connected_peers().await {
            let encrypted = match envelope::encrypt(&entry.rsa_public_key, signing, payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        target: "gw_client",
                        event = "broadcast_encrypt_failed",
                        peer_id = %entry.id,
                        error = %e
                    );
                    continue;
                }
            };
            let frame = MessageFrame::to_user(entry.id.clone(), encrypted);
            match serde_json::to_value(&frame) {
                Ok(value) => {
                    if let Err(e) = self.inner.transport.emit(EVENT_MESSAGE, value).await {
                        warn!(
                            target: "gw_client",
                            event = "broadcast_emit_failed",
                            peer_id = %entry.id,
                            error = %e
                        );
                    } else {
                        sent += 1;
                    }
                }
                Err(e) => {
                    warn!(target: "gw_client", event = "broadcast_encode_failed", error = %e);
                }
            }
        }
        Ok(sent)
    }

    /// Push one event from the instance to every connected user device.
    pub async fn new_event_instance(
        &self,
        event: &str,
        data: Value,
    ) -> Result<usize, GatewayError> {
        let payload = serde_json::to_value(E2eePayload::event(event, data))?;
        self.send_message_all_users(&payload).await
    }

    /// Round-trip time to the relay, milliseconds. The emitted timestamp
    /// is the sentinel; the server echoes it back on the ack.
    pub async fn calculate_latency(&self) -> Result<i64, GatewayError> {
        let sentinel = Utc::now().timestamp_millis();
        let _ = self
            .inner
            .transport
            .emit_with_ack(EVENT_LATENCY, Value::from(sentinel))
            .await
            .map_err(|e| self.inner.map_emit_error(e))?;
        Ok(Utc::now().timestamp_millis() - sentinel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use gw_crypto::KeyBundle;

    use crate::testutil::{instance_rig, peer_user, user_rig};

    /// Script the instance end of the tunnel: decrypt the request, check
    /// it with `verify`, ack with an encrypted `response`.
    async fn script_instance_ack(
        rig: &crate::testutil::TestRig,
        instance: &KeyBundle,
        user: &KeyBundle,
        verify: impl Fn(&Value) + Send + Sync + 'static,
        response: Value,
    ) {
        let instance_rsa = instance.rsa_private.clone();
        let instance_signing = instance.ecdsa_signing.clone();
        let user_verifying = user.ecdsa_verifying;
        let user_rsa_public = user.rsa_public.clone();
        rig.transport
            .on_ack(EVENT_MESSAGE, move |frame| {
                let envelope: Envelope =
                    serde_json::from_value(frame["encryptedMessage"].clone())?;
                let request = envelope::decrypt(
                    &instance_rsa,
                    &user_verifying,
                    &envelope,
                    &DecryptOptions::default(),
                )?;
                verify(&request);
                let reply =
                    envelope::encrypt(&user_rsa_public, &instance_signing, &response)?;
                Ok(serde_json::to_value(reply)?)
            })
            .await;
    }

    #[tokio::test]
    async fn api_call_roundtrip_resolves_with_decrypted_payload() {
        let user = KeyBundle::generate().expect("user");
        let instance = KeyBundle::generate().expect("instance");
        let rig = user_rig(&user, &instance).await;
        rig.session.connect().await.expect("connect");

        script_instance_ack(
            &rig,
            &instance,
            &user,
            |request| {
                assert_eq!(
                    request,
                    &json!({
                        "type": "gladys-api-call",
                        "version": "1.0",
                        "options": {"url": "/devices", "method": "GET", "query": {"limit": 10}}
                    })
                );
            },
            json!({"status": 200, "body": [{"id": "lamp"}]}),
        )
        .await;

        let response = rig
            .session
            .send_request_get("/devices", Some(json!({"limit": 10})))
            .await
            .expect("request resolves");
        assert_eq!(response["status"], 200);
        assert_eq!(response["body"][0]["id"], "lamp");
    }

    #[tokio::test]
    async fn post_body_travels_as_data() {
        let user = KeyBundle::generate().expect("user");
        let instance = KeyBundle::generate().expect("instance");
        let rig = user_rig(&user, &instance).await;
        rig.session.connect().await.expect("connect");

        script_instance_ack(
            &rig,
            &instance,
            &user,
            |request| {
                assert_eq!(request["options"]["method"], "POST");
                assert_eq!(request["options"]["data"], json!({"on": true}));
                assert!(request["options"].get("query").is_none());
            },
            json!({"status": 200}),
        )
        .await;

        rig.session
            .send_request_post("/light/1", Some(json!({"on": true})))
            .await
            .expect("request resolves");
    }

    #[tokio::test]
    async fn transport_error_ack_rejects_as_is() {
        let user = KeyBundle::generate().expect("user");
        let instance = KeyBundle::generate().expect("instance");
        let rig = user_rig(&user, &instance).await;
        rig.session.connect().await.expect("connect");

        rig.transport
            .on_ack(EVENT_MESSAGE, |_| {
                Ok(json!({"status": 504, "error_code": "INSTANCE_OFFLINE"}))
            })
            .await;

        let err = rig
            .session
            .send_request_get("/devices", None)
            .await
            .expect_err("must reject");
        match err {
            GatewayError::Api { status, body } => {
                assert_eq!(status, 504);
                assert_eq!(body["error_code"], "INSTANCE_OFFLINE");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn decrypted_error_status_rejects_with_payload() {
        let user = KeyBundle::generate().expect("user");
        let instance = KeyBundle::generate().expect("instance");
        let rig = user_rig(&user, &instance).await;
        rig.session.connect().await.expect("connect");

        script_instance_ack(
            &rig,
            &instance,
            &user,
            |_| {},
            json!({"status": 404, "error": "device not found"}),
        )
        .await;

        let err = rig
            .session
            .send_request_get("/devices/nope", None)
            .await
            .expect_err("must reject");
        match err {
            GatewayError::Api { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body["error"], "device not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn request_without_instance_fails_fast() {
        let user = KeyBundle::generate().expect("user");
        let instance = KeyBundle::generate().expect("instance");
        let rig = user_rig(&user, &instance).await;
        rig.control.instances.lock().expect("poisoned").clear();
        rig.session.connect().await.expect("connect");

        let err = rig
            .session
            .send_request_get("/devices", None)
            .await
            .expect_err("no instance");
        assert!(matches!(err, GatewayError::NoInstanceId));
    }

    #[tokio::test]
    async fn request_after_disconnect_rejects_session_closed() {
        let user = KeyBundle::generate().expect("user");
        let instance = KeyBundle::generate().expect("instance");
        let rig = user_rig(&user, &instance).await;
        rig.session.connect().await.expect("connect");
        rig.session.disconnect().await;

        let err = rig
            .session
            .send_request_get("/devices", None)
            .await
            .expect_err("closed");
        assert!(matches!(err, GatewayError::SessionClosed));
    }

    #[tokio::test]
    async fn send_message_to_offline_user_is_undelivered() {
        let instance = KeyBundle::generate().expect("instance");
        let user = KeyBundle::generate().expect("user");
        let rig = instance_rig(
            &instance,
            vec![peer_user(&user, "peer-1", Some("g4-1"), false)],
        )
        .await;
        rig.session.connect().await.expect("connect");

        let err = rig
            .session
            .send_message_to_user("g4-1", &json!({"m": 1}))
            .await
            .expect_err("offline peer");
        assert!(matches!(err, GatewayError::Undelivered(_)));
        // Nothing beyond the auth frame went out.
        assert_eq!(rig.transport.emitted().await.len(), 1);
    }

    #[tokio::test]
    async fn broadcast_skips_disconnected_peers() {
        let instance = KeyBundle::generate().expect("instance");
        let online_a = KeyBundle::generate().expect("peer a");
        let online_b = KeyBundle::generate().expect("peer b");
        let offline = KeyBundle::generate().expect("peer c");
        let rig = instance_rig(
            &instance,
            vec![
                peer_user(&online_a, "peer-a", Some("g4-a"), true),
                peer_user(&online_b, "peer-b", Some("g4-b"), true),
                peer_user(&offline, "peer-c", Some("g4-c"), false),
            ],
        )
        .await;
        rig.session.connect().await.expect("connect");

        let sent = rig
            .session
            .new_event_instance("deviceStateChange", json!({"id": "x"}))
            .await
            .expect("broadcast");
        assert_eq!(sent, 2);

        let emitted = rig.transport.emitted().await;
        let targets: Vec<&str> = emitted
            .iter()
            .filter(|(event, _)| event == EVENT_MESSAGE)
            .map(|(_, frame)| frame["user_id"].as_str().expect("user target"))
            .collect();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&"peer-a"));
        assert!(targets.contains(&"peer-b"));

        // Each connected peer can open its own copy.
        let (_, frame) = emitted
            .iter()
            .find(|(event, frame)| event == EVENT_MESSAGE && frame["user_id"] == "peer-a")
            .expect("frame for peer-a");
        let envelope: Envelope =
            serde_json::from_value(frame["encryptedMessage"].clone()).expect("envelope");
        let payload = envelope::decrypt(
            &online_a.rsa_private,
            &instance.ecdsa_verifying,
            &envelope,
            &DecryptOptions::default(),
        )
        .expect("peer decrypts");
        assert_eq!(payload["event"], "deviceStateChange");
        assert_eq!(payload["data"]["id"], "x");
    }

    #[tokio::test]
    async fn latency_probe_round_trips() {
        let user = KeyBundle::generate().expect("user");
        let instance = KeyBundle::generate().expect("instance");
        let rig = user_rig(&user, &instance).await;
        rig.transport
            .on_ack(EVENT_LATENCY, |sentinel| Ok(sentinel.clone()))
            .await;
        rig.session.connect().await.expect("connect");

        let latency = rig.session.calculate_latency().await.expect("probe");
        assert!(latency >= 0);
    }
}
