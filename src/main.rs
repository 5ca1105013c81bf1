//! Realtime Chat Server - Entry Point
//!
//! Starts the TCP listener and the Hub actor, accepting connections.

use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use realtime_chat::{handle_connection, Hub, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "realtime_chat")]
#[command(about = "WebSocket chat server with global chat and rooms", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=realtime_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("realtime_chat=info")),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(ServerConfig::default());

    // Start TCP listener
    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket Chat Server listening on {}", addr);
    info!("Local access:   ws://localhost:{}", args.port);
    match local_ip() {
        Some(ip) => info!("Network access: ws://{}:{}", ip, args.port),
        None => info!("Network access: unavailable (no outbound interface)"),
    }

    // Create the Hub actor (it starts the Room Manager)
    let (hub, hub_handle) = Hub::new(&config);
    tokio::spawn(hub.run());

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let hub_handle = hub_handle.clone();
                let config = config.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, hub_handle, config).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Address of the interface used for outbound traffic, for the startup banner
///
/// Connecting a UDP socket sends no packets; it only selects a route.
fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
