//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, inbound
//! record classification, the outbound write task, liveness pings and
//! cleanup when the connection ends.

use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::client::{ClientHandle, Participant};
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::hub::HubHandle;
use crate::message::{encode, ChatMessage, ClientMessage, RoomAction, ServerMessage};
use crate::outbox::{self, OutboxReceiver};
use crate::types::{timestamp, ClientId, RoomId};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// The only path that accepts a WebSocket upgrade
const WS_PATH: &str = "/ws";

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the client with the Hub,
/// and serves it until either side of the connection ends.
pub async fn handle_connection(
    stream: TcpStream,
    hub: HubHandle,
    config: Arc<ServerConfig>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake on `/ws`; the display name comes from `?username=`
    let mut username = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() != WS_PATH {
            debug!("Rejecting upgrade on {} from {}", request.uri().path(), peer_addr);
            return Err(not_found());
        }
        username = username_from_query(request.uri().query());
        Ok(response)
    };
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    let ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config)).await?;
    let (ws_sender, mut ws_receiver) = ws_stream.split();

    let (outbox, outbox_rx) = outbox::channel(config.outbound_capacity);
    let client = Arc::new(ClientHandle::new(ClientId::new(), username, outbox));
    info!(
        "Client {} ({}) connected from {}",
        client.id, client.username, peer_addr
    );

    hub.register(client.clone()).await?;

    // Spawn write task (outbox -> WebSocket)
    let mut write_task = tokio::spawn(write_pump(ws_sender, outbox_rx, config.clone()));
    let mut write_done = false;

    let mut session = Session {
        client: client.clone(),
        current_room: None,
        hub: hub.clone(),
    };

    let mut result = Ok(());
    loop {
        let frame = tokio::select! {
            frame = time::timeout(config.read_timeout, ws_receiver.next()) => frame,
            _ = &mut write_task => {
                debug!("Write task ended for {}", client.id);
                write_done = true;
                break;
            }
        };

        match frame {
            Err(_) => {
                info!("Client {} timed out", client.id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Err(e) = session.dispatch(&text).await {
                    result = Err(e);
                    break;
                }
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                debug!("Client {} sent close frame", client.id);
                break;
            }
            Ok(Some(Ok(Message::Pong(_)))) => {
                debug!("Pong from {}", client.id);
            }
            Ok(Some(Ok(_))) => {
                // Binary, ping and raw frames - ignore
            }
            Ok(Some(Err(e))) => {
                warn!("WebSocket error for {}: {}", client.id, e);
                break;
            }
        }
    }

    session.cleanup().await;
    // Normally already closed by the Hub; covers a Hub that has gone away
    client.outbox().close();
    if !write_done {
        let _ = write_task.await;
    }

    info!("Client {} ({}) disconnected", client.id, client.username);

    result
}

/// Connection-owned state of one client
struct Session {
    client: Arc<ClientHandle>,
    /// Room the client is in, as last confirmed by the Room Manager
    current_room: Option<RoomId>,
    hub: HubHandle,
}

impl Session {
    /// Classify and handle one inbound text frame
    ///
    /// Only fatal errors are returned; everything else is logged or
    /// reported to the client.
    async fn dispatch(&mut self, text: &str) -> Result<(), AppError> {
        let result = match ClientMessage::parse(text) {
            Ok(ClientMessage::Room(action)) => self.handle_room_action(action).await,
            Ok(ClientMessage::Chat { kind, content }) => self.handle_chat(kind, content).await,
            Err(e) => {
                warn!("Dropping malformed record from {}: {}", self.client.id, e);
                return Ok(());
            }
        };

        match result {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("Reporting error to {}: {}", self.client.id, e);
                self.reply(e.into()).await;
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn handle_chat(&mut self, kind: String, content: String) -> Result<(), AppError> {
        let chat = ChatMessage {
            kind,
            username: self.client.username.clone(),
            content,
            timestamp: timestamp(),
            room_id: self.current_room.clone(),
        };
        let payload = encode(&chat)?;
        let sender = Some(self.client.id);

        match &self.current_room {
            Some(room_id) => {
                debug!("Chat from {} to room {}", self.client.id, room_id);
                self.hub
                    .rooms()
                    .broadcast_to_room(room_id.clone(), payload, sender)
                    .await
            }
            None => {
                debug!("Chat from {} to everyone", self.client.id);
                self.hub.broadcast(payload, sender).await
            }
        }
    }

    async fn handle_room_action(&mut self, action: RoomAction) -> Result<(), AppError> {
        match action {
            RoomAction::Create { room_name } => {
                let room_id = self
                    .hub
                    .rooms()
                    .create_room(room_name.clone(), self.client.username.clone())
                    .await?;
                self.reply(ServerMessage::RoomCreated {
                    room_id: room_id.clone(),
                    room_name,
                    message: "Room created successfully".to_string(),
                })
                .await;

                // Creator joins automatically
                self.join(room_id).await
            }
            RoomAction::Join { room_id } => self.join(RoomId::from(room_id)).await,
            RoomAction::Leave => self.leave().await,
            RoomAction::List => {
                let rooms = self.hub.rooms().list_rooms().await?;
                self.reply(ServerMessage::RoomList { rooms }).await;
                Ok(())
            }
        }
    }

    async fn join(&mut self, room_id: RoomId) -> Result<(), AppError> {
        let room = self
            .hub
            .rooms()
            .join_room(self.client.clone(), room_id.clone())
            .await?;

        info!("Client {} joined room {}", self.client.id, room_id);
        self.current_room = Some(room_id.clone());
        self.reply(ServerMessage::RoomJoined {
            room_id,
            room_name: room.name().to_string(),
            message: "Successfully joined room".to_string(),
        })
        .await;
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), AppError> {
        let Some(room_id) = self.current_room.clone() else {
            return Err(AppError::NotInRoom);
        };

        let left = self
            .hub
            .rooms()
            .leave_room(self.client.id, room_id.clone())
            .await?;
        // Either way the client is no longer in that room
        self.current_room = None;
        if !left {
            return Err(AppError::NotInRoom);
        }

        info!("Client {} left room {}", self.client.id, room_id);
        self.reply(ServerMessage::RoomLeft {
            message: "Successfully left room".to_string(),
        })
        .await;
        Ok(())
    }

    /// Queue a direct response for this client
    async fn reply(&self, msg: ServerMessage) {
        if let Err(e) = self.client.send(&msg).await {
            debug!("Could not reply to {}: {}", self.client.id, e);
        }
    }

    /// Leave the current room and unregister from the Hub
    async fn cleanup(&mut self) {
        if let Some(room_id) = self.current_room.take() {
            if let Err(e) = self
                .hub
                .rooms()
                .leave_room(self.client.id, room_id)
                .await
            {
                error!("Failed to leave room for {}: {}", self.client.id, e);
            }
        }
        if let Err(e) = self.hub.unregister(self.client.id).await {
            error!("Failed to unregister {}: {}", self.client.id, e);
        }
    }
}

/// Write task: drains the outbox into the socket and sends liveness pings
///
/// Ends when the outbox is closed, a write fails or a write exceeds its
/// deadline.
async fn write_pump(mut ws_sender: WsSink, mut outbox_rx: OutboxReceiver, config: Arc<ServerConfig>) {
    let mut ping = time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        tokio::select! {
            payload = outbox_rx.recv() => {
                let Some(first) = payload else {
                    debug!("Outbox closed, ending write task");
                    break;
                };
                let frame = batch(first, &mut outbox_rx);
                let sent = time::timeout(
                    config.write_timeout,
                    ws_sender.send(Message::Text(frame.into())),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    debug!("WebSocket send failed, ending write task");
                    break;
                }
            }
            _ = ping.tick() => {
                let sent = time::timeout(
                    config.write_timeout,
                    ws_sender.send(Message::Ping(Vec::new())),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    debug!("Ping failed, ending write task");
                    break;
                }
            }
        }
    }

    // Send close frame when done
    let _ = time::timeout(config.write_timeout, ws_sender.close()).await;
}

/// Join the first payload with everything already queued behind it, one
/// record per line
fn batch(first: outbox::Payload, outbox_rx: &mut OutboxReceiver) -> String {
    let mut frame = String::from(&*first);
    while let Some(next) = outbox_rx.try_recv() {
        frame.push('\n');
        frame.push_str(&next);
    }
    frame
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Extract a non-empty `username` from a request query string
fn username_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "username")
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_from_query() {
        assert_eq!(
            username_from_query(Some("username=Alice")),
            Some("Alice".to_string())
        );
        assert_eq!(
            username_from_query(Some("x=1&username=Bob%20Smith")),
            Some("Bob Smith".to_string())
        );
        assert_eq!(username_from_query(Some("username=")), None);
        assert_eq!(username_from_query(Some("other=1")), None);
        assert_eq!(username_from_query(None), None);
    }

    #[test]
    fn test_not_found_response() {
        let response = not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_deref(), Some("Not Found"));
    }

    #[tokio::test]
    async fn test_batch_joins_queued_payloads() {
        let (outbox, mut rx) = outbox::channel(8);
        outbox.try_deliver(Arc::from("b")).unwrap();
        outbox.try_deliver(Arc::from("c")).unwrap();

        assert_eq!(batch(Arc::from("a"), &mut rx), "a\nb\nc");
        assert!(rx.try_recv().is_none());
    }
}
