//! Per-session cryptographic primitives.
//!
//! Everything in here is scoped to a single connection: key material is
//! generated when the session starts and dropped with it. Nothing is
//! persisted or shared across sessions.

pub mod keyring;

pub use keyring::{CryptoError, KeyRing, KeyRole};
