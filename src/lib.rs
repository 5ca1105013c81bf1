//! Realtime WebSocket Chat Server Library
//!
//! A fan-out message broadcaster for text chat built with tokio-tungstenite
//! using the Actor pattern for state management.
//!
//! # Features
//! - Global chat for every connected client
//! - Rooms: create, join, leave, list
//! - Join/leave notices for the global chat and for each room
//! - Slow consumers are dropped instead of blocking a broadcast
//! - Read inactivity timeout, write deadlines and liveness pings
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` owns the global client set and the global broadcast loop
//! - `RoomManager` owns the room map and serializes room lifecycle requests
//! - Every `Room` runs its own broadcast loop
//! - Each connection has a `handler` task talking to the Hub and Room Manager
//!
//! Only the owning loop mutates a set; outside readers (counts, member
//! names) take a shared lock for the duration of one read.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use realtime_chat::{handle_connection, Hub, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let config = Arc::new(ServerConfig::default());
//!     let (hub, hub_handle) = Hub::new(&config);
//!
//!     tokio::spawn(hub.run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, hub_handle.clone(), config.clone()));
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod manager;
pub mod message;
pub mod outbox;
pub mod room;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientHandle, Member, Participant};
pub use config::ServerConfig;
pub use error::{AppError, DeliveryError};
pub use handler::handle_connection;
pub use hub::{Hub, HubCommand, HubHandle};
pub use manager::{ManagerCommand, RoomManager, RoomManagerHandle};
pub use message::{ChatMessage, ClientMessage, RoomAction, RoomSummary, ServerMessage};
pub use outbox::{Outbox, OutboxReceiver, Payload};
pub use room::{Room, RoomInfo, RoomMember};
pub use types::{ClientId, RoomId};
