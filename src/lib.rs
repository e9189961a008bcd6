//! # Aegis Gateway
//!
//! Secure-channel layer for a multiplayer game backend. Every connection
//! negotiates a mutually-authenticated encrypted channel over a plain
//! WebSocket before any business event (account sign-up) is accepted.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      AEGIS GATEWAY                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  crypto/          - Per-session asymmetric primitives        │
//! │  └── keyring.rs   - Dual RSA keypairs (OAEP + PSS), PEM I/O  │
//! │                                                              │
//! │  validator.rs     - Rule-driven payload validation/decoding  │
//! │                                                              │
//! │  network/         - Networking                               │
//! │  ├── server.rs    - WebSocket accept loop, registry          │
//! │  ├── protocol.rs  - Wire envelopes and event names           │
//! │  └── session.rs   - Handshake state machine, dispatch        │
//! │                                                              │
//! │  storage.rs       - Profile persistence behind a trait       │
//! │  password.rs      - Slow password hashing behind a trait     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Channel contract
//!
//! Each session holds two independent 2048-bit RSA keypairs: one used only
//! for confidentiality (OAEP) and one used only for authenticity (PSS).
//! Sensitive request fields arrive as base64 ciphertext accompanied by a
//! detached signature computed over the **ciphertext** bytes; the validator
//! verifies the signature and decrypts in a single rule, so business logic
//! never observes a field that is validated but still ciphertext.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod crypto;
pub mod network;
pub mod password;
pub mod storage;
pub mod validator;

// Re-export commonly used types
pub use crypto::keyring::{CryptoError, KeyRing, KeyRole};
pub use network::protocol::{RequestEnvelope, ResponseEnvelope};
pub use network::session::{HandshakeState, SecureSession};
pub use validator::{ValidatedRecord, ValidationError, Validator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// RSA modulus size for session keypairs, in bits.
pub const KEY_BITS: usize = 2048;
