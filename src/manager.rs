//! Room Manager actor implementation
//!
//! Single authority for room lifecycle. Every create/delete/join/leave/
//! broadcast/list request is a message to one loop, which owns the room map
//! and the client → room membership index. Rooms run their own loops; the
//! manager only talks to them through their command channels.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::{Member, Participant};
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::message::RoomSummary;
use crate::outbox::Payload;
use crate::room::{Room, RoomInfo, RoomMember};
use crate::types::{ClientId, RoomId};

/// Commands sent to the Room Manager actor
#[derive(Debug)]
pub enum ManagerCommand {
    CreateRoom {
        name: String,
        created_by: String,
        reply: oneshot::Sender<RoomId>,
    },
    DeleteRoom {
        room_id: RoomId,
        reply: oneshot::Sender<bool>,
    },
    JoinRoom {
        member: Member,
        room_id: RoomId,
        reply: oneshot::Sender<Result<Room, AppError>>,
    },
    LeaveRoom {
        client_id: ClientId,
        room_id: RoomId,
        reply: oneshot::Sender<bool>,
    },
    /// Fire-and-forget; dropped if the room does not exist
    Broadcast {
        room_id: RoomId,
        payload: Payload,
        sender: Option<ClientId>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
    RoomCount {
        reply: oneshot::Sender<usize>,
    },
}

/// The Room Manager actor
pub struct RoomManager {
    /// All active rooms: RoomId -> Room
    rooms: HashMap<RoomId, Room>,
    /// Which room each client is in: ClientId -> RoomId
    memberships: HashMap<ClientId, RoomId>,
    receiver: mpsc::Receiver<ManagerCommand>,
    room_command_capacity: usize,
}

/// Cloneable front end to a running Room Manager
#[derive(Debug, Clone)]
pub struct RoomManagerHandle {
    commands: mpsc::Sender<ManagerCommand>,
}

impl RoomManager {
    pub fn new(config: &ServerConfig) -> (Self, RoomManagerHandle) {
        let (commands, receiver) = mpsc::channel(config.command_capacity);
        let manager = Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            receiver,
            room_command_capacity: config.command_capacity,
        };
        (manager, RoomManagerHandle { commands })
    }

    /// Run the Room Manager event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Room Manager started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Room Manager shutting down");
    }

    /// Process a single command
    ///
    /// A dropped reply receiver means the requester went away; that is not
    /// an error for the manager.
    async fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::CreateRoom {
                name,
                created_by,
                reply,
            } => {
                let room_id = self.handle_create(name, created_by);
                let _ = reply.send(room_id);
            }
            ManagerCommand::DeleteRoom { room_id, reply } => {
                let deleted = self.handle_delete(&room_id).await;
                let _ = reply.send(deleted);
            }
            ManagerCommand::JoinRoom {
                member,
                room_id,
                reply,
            } => {
                let result = self.handle_join(member, room_id).await;
                let _ = reply.send(result);
            }
            ManagerCommand::LeaveRoom {
                client_id,
                room_id,
                reply,
            } => {
                let left = self.handle_leave(client_id, &room_id).await;
                let _ = reply.send(left);
            }
            ManagerCommand::Broadcast {
                room_id,
                payload,
                sender,
            } => self.handle_broadcast(&room_id, payload, sender).await,
            ManagerCommand::ListRooms { reply } => {
                let _ = reply.send(self.handle_list().await);
            }
            ManagerCommand::RoomCount { reply } => {
                let _ = reply.send(self.rooms.len());
            }
        }
    }

    fn handle_create(&mut self, name: String, created_by: String) -> RoomId {
        // Generate unique room id
        let room_id = loop {
            let id = RoomId::generate();
            if !self.rooms.contains_key(&id) {
                break id;
            }
        };

        let info = RoomInfo::new(room_id.clone(), name, created_by);
        let (room, room_loop) = Room::open(info, self.room_command_capacity);
        tokio::spawn(room_loop.run());

        info!(
            "Room '{}' ({}) created by {}",
            room.name(),
            room_id,
            room.info().created_by
        );
        self.rooms.insert(room_id.clone(), room);
        room_id
    }

    async fn handle_delete(&mut self, room_id: &RoomId) -> bool {
        let Some(room) = self.rooms.remove(room_id) else {
            return false;
        };

        self.memberships.retain(|_, current| *current != *room_id);
        if room.close().await.is_err() {
            warn!("Room {} loop was already gone on delete", room_id);
        }

        info!("Room '{}' ({}) deleted", room.name(), room_id);
        true
    }

    async fn handle_join(&mut self, member: Member, room_id: RoomId) -> Result<Room, AppError> {
        let Some(room) = self.rooms.get(&room_id).cloned() else {
            return Err(AppError::RoomNotFound(room_id.to_string()));
        };
        let client_id = member.id();

        match self.memberships.get(&client_id).cloned() {
            Some(current) if current == room_id => {
                if room.contains(client_id).await {
                    debug!("Client {} already in room {}", client_id, room_id);
                    return Ok(room);
                }
                // Dropped by a broadcast pass since it joined
                debug!(
                    "Client {} was dropped from room {}, registering again",
                    client_id, room_id
                );
            }
            Some(previous) => {
                // Move out of the previous room in the same step
                self.remove_membership(client_id, &previous).await;
            }
            None => {}
        }

        let room_member = RoomMember::bound_to(&*member, room_id.clone());
        room.register(std::sync::Arc::new(room_member)).await?;
        self.memberships.insert(client_id, room_id);

        Ok(room)
    }

    async fn handle_leave(&mut self, client_id: ClientId, room_id: &RoomId) -> bool {
        let Some(room) = self.rooms.get(room_id) else {
            return false;
        };
        if self.memberships.get(&client_id) != Some(room_id) {
            return false;
        }
        if !room.contains(client_id).await {
            debug!("Client {} was already dropped from room {}", client_id, room_id);
            self.memberships.remove(&client_id);
            return false;
        }
        self.remove_membership(client_id, room_id).await;
        true
    }

    async fn remove_membership(&mut self, client_id: ClientId, room_id: &RoomId) {
        self.memberships.remove(&client_id);
        if let Some(room) = self.rooms.get(room_id) {
            if room.unregister(client_id).await.is_err() {
                warn!("Room {} loop is gone, cannot remove {}", room_id, client_id);
            }
        }
    }

    async fn handle_broadcast(&self, room_id: &RoomId, payload: Payload, sender: Option<ClientId>) {
        let Some(room) = self.rooms.get(room_id) else {
            debug!("Dropping message for unknown room {}", room_id);
            return;
        };
        if room.broadcast(payload, sender).await.is_err() {
            warn!("Room {} loop is gone, message dropped", room_id);
        }
    }

    async fn handle_list(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<&Room> = self.rooms.values().collect();
        rooms.sort_by(|a, b| {
            a.info()
                .created_at
                .cmp(&b.info().created_at)
                .then_with(|| a.id().cmp(b.id()))
        });

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.summary().await);
        }
        summaries
    }
}

impl RoomManagerHandle {
    /// Create a room and start its loop
    pub async fn create_room(&self, name: String, created_by: String) -> Result<RoomId, AppError> {
        self.request(|reply| ManagerCommand::CreateRoom {
            name,
            created_by,
            reply,
        })
        .await
    }

    /// Delete a room, disconnecting all members
    ///
    /// Returns false if no such room exists.
    pub async fn delete_room(&self, room_id: RoomId) -> Result<bool, AppError> {
        self.request(|reply| ManagerCommand::DeleteRoom { room_id, reply })
            .await
    }

    /// Join a room, leaving any other room the client is in
    ///
    /// Fails with `AppError::RoomNotFound` for an unknown id.
    pub async fn join_room(&self, member: Member, room_id: RoomId) -> Result<Room, AppError> {
        self.request(|reply| ManagerCommand::JoinRoom {
            member,
            room_id,
            reply,
        })
        .await?
    }

    /// Leave a room
    ///
    /// Returns false if the room does not exist or the client is not in it.
    pub async fn leave_room(&self, client_id: ClientId, room_id: RoomId) -> Result<bool, AppError> {
        self.request(|reply| ManagerCommand::LeaveRoom {
            client_id,
            room_id,
            reply,
        })
        .await
    }

    /// Broadcast to a room's members except `sender`
    pub async fn broadcast_to_room(
        &self,
        room_id: RoomId,
        payload: Payload,
        sender: Option<ClientId>,
    ) -> Result<(), AppError> {
        self.commands
            .send(ManagerCommand::Broadcast {
                room_id,
                payload,
                sender,
            })
            .await
            .map_err(|_| AppError::ChannelSend)
    }

    /// All active rooms, oldest first
    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, AppError> {
        self.request(|reply| ManagerCommand::ListRooms { reply })
            .await
    }

    /// Number of active rooms
    pub async fn room_count(&self) -> Result<usize, AppError> {
        self.request(|reply| ManagerCommand::RoomCount { reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AppError::ChannelSend)?;
        response.await.map_err(|_| AppError::ChannelSend)
    }
}
