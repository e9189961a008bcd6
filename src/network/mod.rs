//! Networking layer.
//!
//! WebSocket transport, wire envelopes, and the per-connection secure
//! session that drives the handshake state machine.

pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{InEvent, OutEvent, RequestEnvelope, ResponseEnvelope};
pub use server::{GatewayError, GatewayServer, ServerConfig};
pub use session::{HandshakeState, SecureSession};
