//! gw_crypto — cryptographic core of the gateway client
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Secret material is zeroized on drop; derived keys never escape.
//! - Wire encodings (hex fields, JWK JSON strings) are produced and
//!   validated here so upper layers only handle parsed types.
//!
//! # Module layout
//! - `keys`     — long-term RSA-OAEP + ECDSA P-256 keypairs, fingerprints
//! - `jwk`      — JWK import/export (exact wire shapes)
//! - `vault`    — password-derived wrapping of private keys (PBKDF2 + AES-GCM)
//! - `srp`      — SRP-6a credentials and handshake arithmetic
//! - `envelope` — authenticated hybrid encryption between two principals
//! - `error`    — unified error type

pub mod envelope;
pub mod error;
pub mod jwk;
pub mod keys;
pub mod srp;
pub mod vault;

pub use envelope::{DecryptOptions, Envelope};
pub use error::CryptoError;
pub use keys::{KeyAlgorithm, KeyBundle, PrivateKeyMaterial};
pub use vault::WrappedKey;
