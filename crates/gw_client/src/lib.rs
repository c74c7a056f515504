//! gw_client — relay client for E2EE gateway messaging
//!
//! Brokers end-to-end-encrypted traffic between user devices and a
//! home-automation instance through an untrusted relay. The relay sees
//! ciphertext, routing identifiers and connectivity state; it can neither
//! read messages nor impersonate endpoints.
//!
//! # Modules
//! - `auth`      — signup, three-round SRP login, two-factor, recovery
//! - `rest`      — HTTPS calls with transparent access-token refresh
//! - `directory` — peer public-key cache with presence
//! - `transport` — socket transport contract (+ scripted mock)
//! - `session`   — socket session: authenticate, dispatch, reconnect
//! - `router`    — API-over-E2EE request/response and user messaging
//! - `backup`    — multipart backups and the self-encrypted backup key
//! - `ecowatt`   — rate-limited signal feed behind a 30-minute cache

pub mod auth;
pub mod backup;
pub mod config;
pub mod directory;
pub mod ecowatt;
pub mod error;
pub mod rest;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use auth::{LoginOutcome, LoginSuccess, SrpAuthenticator};
pub use config::GatewayConfig;
pub use directory::{PeerDirectory, PeerEntry};
pub use error::GatewayError;
pub use rest::{RestClient, Role, TokenStore};
pub use session::{SessionEvent, SessionKeys, SessionState, SocketSession};
pub use transport::{MockTransport, Transport, TransportEvent};
