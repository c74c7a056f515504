//! gw_proto — wire types for the gateway client
//!
//! All on-wire types are JSON and versioned where the format can evolve.
//!
//! # Modules
//! - `api`     — REST request/response types
//! - `frames`  — socket frames and event names
//! - `payload` — plaintext payloads inside the encrypted envelope
//! - `peer`    — peer key DTOs (JSON-in-JSON JWKs, validated at the boundary)

pub mod api;
pub mod error;
pub mod frames;
pub mod payload;
pub mod peer;

pub use error::ProtoError;
pub use frames::{AuthenticationAck, AuthenticationFrame, MessageFrame};
pub use payload::{ApiCallOptions, E2eePayload};
pub use peer::InstanceUser;
