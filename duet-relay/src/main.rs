//! Duet relay server: pairs two browser peers and relays their signaling.
//!
//! An axum WebSocket server that forwards offer, answer and ICE candidate
//! payloads between the two members of a room. Media never passes through
//! the relay; it only sees opaque negotiation blobs.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin duet-relay
//!
//! # Run on custom address
//! cargo run --bin duet-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! DUET_ADDR=127.0.0.1:8080 cargo run --bin duet-relay
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use duet_relay::config::{RelayCliArgs, RelayConfig};
use duet_relay::relay::{self, RelayState};

/// How long shutdown waits for peers to receive their close frames.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_rooms = config.max_rooms,
        max_message_size = config.max_message_size,
        "starting duet relay server"
    );

    let state = Arc::new(RelayState::from_config(&config));

    let mut handle = match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await
    {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            handle
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested, closing connections");
            if state.shutdown(SHUTDOWN_GRACE).await {
                tracing::info!("all connections closed");
            }
            handle.abort();
        }
    }
}
