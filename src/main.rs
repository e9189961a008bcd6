//! Aegis Gateway
//!
//! Secure-channel front door for the game backend. Terminates
//! WebSocket connections, runs the per-connection key exchange, and
//! serves the encrypted sign-up flow.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aegis_gateway::network::server::{GatewayServer, ServerConfig};
use aegis_gateway::password::BcryptHasher;
use aegis_gateway::storage::MemoryStore;
use aegis_gateway::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env();

    info!("Aegis Gateway v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    info!("Handshake timeout: {:?}", config.handshake_timeout);

    let store = Arc::new(MemoryStore::new());
    let hasher = Arc::new(BcryptHasher::default());

    let server = GatewayServer::new(config, store, hasher);
    server.run().await?;

    Ok(())
}
