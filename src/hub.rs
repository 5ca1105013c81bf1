//! Hub actor implementation
//!
//! The top-level broadcaster. Keeps the set of connected clients, fans out
//! global chat, and owns the Room Manager. All mutation of the client set
//! happens inside `Hub::run`; `HubHandle::client_count` reads it through a
//! shared lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::client::{Member, Participant};
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::manager::{RoomManager, RoomManagerHandle};
use crate::message::{encode, ServerMessage};
use crate::outbox::{broadcast_pass, Payload};
use crate::types::ClientId;

type ClientSet = HashMap<ClientId, Member>;

/// Commands sent from connection handlers to the Hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// Client completed the handshake
    Register { member: Member },
    /// Client disconnected
    Unregister { client_id: ClientId },
    /// Deliver a payload to every client except `sender`
    Broadcast {
        payload: Payload,
        sender: Option<ClientId>,
    },
}

/// The Hub actor
pub struct Hub {
    clients: Arc<RwLock<ClientSet>>,
    receiver: mpsc::Receiver<HubCommand>,
    room_manager: Option<RoomManager>,
}

/// Cloneable front end to a running Hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    clients: Arc<RwLock<ClientSet>>,
    rooms: RoomManagerHandle,
}

impl Hub {
    /// Create a Hub and the handle used to talk to it
    ///
    /// Nothing runs until `run` is spawned; it also starts the Room Manager.
    pub fn new(config: &ServerConfig) -> (Self, HubHandle) {
        let (commands, receiver) = mpsc::channel(config.command_capacity);
        let (room_manager, rooms) = RoomManager::new(config);
        let clients = Arc::new(RwLock::new(HashMap::new()));

        let hub = Self {
            clients: clients.clone(),
            receiver,
            room_manager: Some(room_manager),
        };
        let handle = HubHandle {
            commands,
            clients,
            rooms,
        };
        (hub, handle)
    }

    /// Run the Hub event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        if let Some(room_manager) = self.room_manager.take() {
            tokio::spawn(room_manager.run());
        }

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Hub shutting down");
    }

    async fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { member } => self.handle_register(member).await,
            HubCommand::Unregister { client_id } => self.handle_unregister(client_id).await,
            HubCommand::Broadcast { payload, sender } => {
                let mut clients = self.clients.write().await;
                deliver(&mut clients, &payload, sender);
            }
        }
    }

    async fn handle_register(&mut self, member: Member) {
        let mut clients = self.clients.write().await;
        let client_id = member.id();
        let name = member.display_name().to_string();
        clients.insert(client_id, member);

        info!(
            "Client {} ({}) connected. Total clients: {}",
            client_id,
            name,
            clients.len()
        );

        announce(&mut clients, format!("{} joined the chat", name), Some(client_id));
    }

    async fn handle_unregister(&mut self, client_id: ClientId) {
        let mut clients = self.clients.write().await;
        let Some(member) = clients.remove(&client_id) else {
            debug!("Unregister for unknown client {}", client_id);
            return;
        };
        member.outbox().close();

        info!(
            "Client {} ({}) disconnected. Total clients: {}",
            client_id,
            member.display_name(),
            clients.len()
        );

        announce(
            &mut clients,
            format!("{} left the chat", member.display_name()),
            None,
        );
    }
}

/// Send a system notice to the client set
fn announce(clients: &mut ClientSet, text: String, sender: Option<ClientId>) {
    match encode(&ServerMessage::system(text)) {
        Ok(payload) => deliver(clients, &payload, sender),
        Err(e) => error!("Failed to serialize system notice: {}", e),
    }
}

fn deliver(clients: &mut ClientSet, payload: &Payload, sender: Option<ClientId>) {
    for member in broadcast_pass(clients, payload, sender) {
        warn!(
            "Dropped unresponsive client {} ({}) from the hub",
            member.id(),
            member.display_name()
        );
    }
}

impl HubHandle {
    /// Register a client with the global chat
    pub async fn register(&self, member: Member) -> Result<(), AppError> {
        self.send(HubCommand::Register { member }).await
    }

    /// Remove a client and close its outbound queue
    pub async fn unregister(&self, client_id: ClientId) -> Result<(), AppError> {
        self.send(HubCommand::Unregister { client_id }).await
    }

    /// Broadcast a payload to every registered client except `sender`
    pub async fn broadcast(&self, payload: Payload, sender: Option<ClientId>) -> Result<(), AppError> {
        self.send(HubCommand::Broadcast { payload, sender }).await
    }

    /// Point-in-time number of registered clients
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// The Room Manager owned by this Hub
    pub fn rooms(&self) -> &RoomManagerHandle {
        &self.rooms
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), AppError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| AppError::ChannelSend)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::ClientHandle;
    use crate::outbox::{self, Outbox, OutboxReceiver};

    fn start_hub() -> HubHandle {
        let (hub, handle) = Hub::new(&ServerConfig::default());
        tokio::spawn(hub.run());
        handle
    }

    fn client(name: &str, capacity: usize) -> (Arc<ClientHandle>, Outbox, OutboxReceiver) {
        let (outbox, rx) = outbox::channel(capacity);
        let handle = Arc::new(ClientHandle::new(
            ClientId::new(),
            Some(name.to_string()),
            outbox.clone(),
        ));
        (handle, outbox, rx)
    }

    async fn wait_for_count(hub: &HubHandle, expected: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while hub.client_count().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client count did not settle");
    }

    async fn next_json(rx: &mut OutboxReceiver) -> serde_json::Value {
        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for payload")
            .expect("outbox closed");
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_client_count_tracks_register_unregister() {
        let hub = start_hub();
        let (a, _a_box, _a_rx) = client("A", 16);
        let (b, _b_box, _b_rx) = client("B", 16);

        hub.register(a.clone()).await.unwrap();
        hub.register(b.clone()).await.unwrap();
        wait_for_count(&hub, 2).await;

        hub.unregister(a.id).await.unwrap();
        wait_for_count(&hub, 1).await;

        // Unknown ids are ignored
        hub.unregister(ClientId::new()).await.unwrap();
        hub.unregister(a.id).await.unwrap();
        hub.unregister(b.id).await.unwrap();
        wait_for_count(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_join_and_leave_notices() {
        let hub = start_hub();
        let (a, _a_box, mut a_rx) = client("A", 16);
        let (b, b_box, mut b_rx) = client("B", 16);

        hub.register(a.clone()).await.unwrap();
        hub.register(b.clone()).await.unwrap();

        let notice = next_json(&mut a_rx).await;
        assert_eq!(notice["type"], "system");
        assert_eq!(notice["message"], "B joined the chat");

        hub.unregister(b.id).await.unwrap();
        let notice = next_json(&mut a_rx).await;
        assert_eq!(notice["message"], "B left the chat");

        // B never saw its own join notice, and its queue is now closed
        assert!(b_box.is_closed());
        assert_eq!(b_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = start_hub();
        let (a, _a_box, mut a_rx) = client("A", 16);
        let (b, _b_box, mut b_rx) = client("B", 16);

        hub.register(a.clone()).await.unwrap();
        hub.register(b.clone()).await.unwrap();
        next_json(&mut a_rx).await; // "B joined the chat"

        hub.broadcast(Arc::from(r#"{"n":1}"#), Some(a.id))
            .await
            .unwrap();
        hub.broadcast(Arc::from(r#"{"n":2}"#), None).await.unwrap();

        assert_eq!(next_json(&mut b_rx).await["n"], 1);
        assert_eq!(next_json(&mut b_rx).await["n"], 2);
        assert_eq!(next_json(&mut a_rx).await["n"], 2);
    }

    #[tokio::test]
    async fn test_saturated_client_evicted() {
        let hub = start_hub();
        let (slow, slow_box, _slow_rx) = client("Slow", 1);
        let (fast, _fast_box, mut fast_rx) = client("Fast", 16);

        hub.register(slow.clone()).await.unwrap();
        wait_for_count(&hub, 1).await;
        slow_box.try_deliver(Arc::from("backlog")).unwrap();

        // The "Fast joined the chat" notice overflows Slow's queue
        hub.register(fast.clone()).await.unwrap();
        hub.broadcast(Arc::from(r#"{"n":1}"#), None).await.unwrap();
        assert_eq!(next_json(&mut fast_rx).await["n"], 1);

        assert!(slow_box.is_closed());
        assert_eq!(hub.client_count().await, 1);
    }
}
