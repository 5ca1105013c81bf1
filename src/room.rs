//! Room actor implementation
//!
//! A named sub-channel with its own member set and broadcast loop. The
//! Room Manager holds a cloneable `Room` handle and spawns the matching
//! `RoomLoop`; only the loop mutates the member set.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::client::{Member, Participant};
use crate::error::AppError;
use crate::message::{encode, RoomSummary, ServerMessage};
use crate::outbox::{broadcast_pass, Outbox, Payload};
use crate::types::{ClientId, RoomId};

type MemberSet = HashMap<ClientId, Member>;

/// Immutable room metadata
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl RoomInfo {
    pub fn new(id: RoomId, name: String, created_by: String) -> Self {
        Self {
            id,
            name,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// Room-scoped record of a client
///
/// Carries the client's identity and shares its outbound queue, so room
/// traffic reaches the same connection as global traffic.
#[derive(Debug)]
pub struct RoomMember {
    id: ClientId,
    username: String,
    outbox: Outbox,
    room_id: RoomId,
}

impl RoomMember {
    /// Bind a participant's identity to a room
    pub fn bound_to(participant: &dyn Participant, room_id: RoomId) -> Self {
        Self {
            id: participant.id(),
            username: participant.display_name().to_string(),
            outbox: participant.outbox().clone(),
            room_id,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}

impl Participant for RoomMember {
    fn id(&self) -> ClientId {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.username
    }

    fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

/// Commands processed by a room's loop
#[derive(Debug)]
pub(crate) enum RoomCommand {
    /// Answered once the member is in the set (or was already there)
    Register {
        member: Member,
        done: oneshot::Sender<()>,
    },
    Unregister { client_id: ClientId },
    Broadcast {
        payload: Payload,
        sender: Option<ClientId>,
    },
    /// Evict every member and stop the loop
    Close,
}

/// Handle to a running room
#[derive(Debug, Clone)]
pub struct Room {
    info: Arc<RoomInfo>,
    members: Arc<RwLock<MemberSet>>,
    commands: mpsc::Sender<RoomCommand>,
}

/// The room's broadcast loop; spawn `run` once per room
pub struct RoomLoop {
    info: Arc<RoomInfo>,
    members: Arc<RwLock<MemberSet>>,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl Room {
    /// Create a room handle and its (not yet running) loop
    pub fn open(info: RoomInfo, command_capacity: usize) -> (Room, RoomLoop) {
        let info = Arc::new(info);
        let members = Arc::new(RwLock::new(HashMap::new()));
        let (commands, receiver) = mpsc::channel(command_capacity);

        let room = Room {
            info: info.clone(),
            members: members.clone(),
            commands,
        };
        let room_loop = RoomLoop {
            info,
            members,
            receiver,
        };
        (room, room_loop)
    }

    pub fn id(&self) -> &RoomId {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    /// Number of current members
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Display names of current members
    pub async fn member_names(&self) -> Vec<String> {
        self.members
            .read()
            .await
            .values()
            .map(|member| member.display_name().to_string())
            .collect()
    }

    /// Whether the client is currently a member
    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.members.read().await.contains_key(&client_id)
    }

    /// Snapshot for `room_list`
    pub async fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            client_count: self.member_count().await,
            created_by: self.info.created_by.clone(),
            created_at: self
                .info
                .created_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Add a member, returning once the room loop has applied it
    pub(crate) async fn register(&self, member: Member) -> Result<(), AppError> {
        let (done, registered) = oneshot::channel();
        self.send(RoomCommand::Register { member, done }).await?;
        registered.await.map_err(|_| AppError::ChannelSend)
    }

    pub(crate) async fn unregister(&self, client_id: ClientId) -> Result<(), AppError> {
        self.send(RoomCommand::Unregister { client_id }).await
    }

    pub(crate) async fn broadcast(
        &self,
        payload: Payload,
        sender: Option<ClientId>,
    ) -> Result<(), AppError> {
        self.send(RoomCommand::Broadcast { payload, sender }).await
    }

    pub(crate) async fn close(&self) -> Result<(), AppError> {
        self.send(RoomCommand::Close).await
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), AppError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| AppError::ChannelSend)
    }
}

impl RoomLoop {
    /// Run the room's event loop until it is closed or every handle is dropped
    pub async fn run(mut self) {
        info!("Room '{}' ({}) started", self.info.name, self.info.id);

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Register { member, done } => {
                    self.handle_register(member).await;
                    let _ = done.send(());
                }
                RoomCommand::Unregister { client_id } => self.handle_unregister(client_id).await,
                RoomCommand::Broadcast { payload, sender } => {
                    let mut members = self.members.write().await;
                    self.deliver(&mut members, &payload, sender);
                }
                RoomCommand::Close => {
                    self.handle_close().await;
                    break;
                }
            }
        }

        info!("Room '{}' ({}) stopped", self.info.name, self.info.id);
    }

    async fn handle_register(&self, member: Member) {
        let mut members = self.members.write().await;
        let client_id = member.id();
        if members.contains_key(&client_id) {
            debug!(
                "Client {} already in room '{}', ignoring join",
                client_id, self.info.name
            );
            return;
        }

        let name = member.display_name().to_string();
        members.insert(client_id, member);
        info!(
            "Client {} ({}) joined room '{}'. Room clients: {}",
            client_id,
            name,
            self.info.name,
            members.len()
        );

        self.announce(&mut members, format!("{} joined the room", name), Some(client_id));
    }

    async fn handle_unregister(&self, client_id: ClientId) {
        let mut members = self.members.write().await;
        let Some(member) = members.remove(&client_id) else {
            return;
        };
        info!(
            "Client {} ({}) left room '{}'. Room clients: {}",
            client_id,
            member.display_name(),
            self.info.name,
            members.len()
        );

        self.announce(
            &mut members,
            format!("{} left the room", member.display_name()),
            None,
        );
    }

    async fn handle_close(&self) {
        let mut members = self.members.write().await;
        for (_, member) in members.drain() {
            member.outbox().close();
        }
        info!("Room '{}' ({}) closed", self.info.name, self.info.id);
    }

    fn announce(&self, members: &mut MemberSet, text: String, sender: Option<ClientId>) {
        match encode(&ServerMessage::system(text)) {
            Ok(payload) => self.deliver(members, &payload, sender),
            Err(e) => error!("Failed to serialize room notice: {}", e),
        }
    }

    fn deliver(&self, members: &mut MemberSet, payload: &Payload, sender: Option<ClientId>) {
        for member in broadcast_pass(members, payload, sender) {
            warn!(
                "Dropped unresponsive client {} ({}) from room '{}'",
                member.id(),
                member.display_name(),
                self.info.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::ClientHandle;
    use crate::outbox::{self, OutboxReceiver};

    fn start_room(name: &str) -> Room {
        let info = RoomInfo::new(RoomId::generate(), name.to_string(), "tester".to_string());
        let (room, room_loop) = Room::open(info, 16);
        tokio::spawn(room_loop.run());
        room
    }

    fn member(name: &str, room: &Room, capacity: usize) -> (Member, Outbox, OutboxReceiver) {
        let (outbox, rx) = outbox::channel(capacity);
        let client = ClientHandle::new(ClientId::new(), Some(name.to_string()), outbox.clone());
        let member: Member = Arc::new(RoomMember::bound_to(&client, room.id().clone()));
        (member, outbox, rx)
    }

    async fn next_json(rx: &mut OutboxReceiver) -> serde_json::Value {
        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for payload")
            .expect("outbox closed");
        serde_json::from_str(&payload).unwrap()
    }

    #[test]
    fn test_room_member_binding() {
        let (outbox, _rx) = outbox::channel(4);
        let client = ClientHandle::new(ClientId::new(), Some("Alice".to_string()), outbox);
        let bound = RoomMember::bound_to(&client, RoomId::from("r1"));

        assert_eq!(bound.id(), client.id);
        assert_eq!(bound.display_name(), "Alice");
        assert_eq!(bound.room_id(), &RoomId::from("r1"));
    }

    #[tokio::test]
    async fn test_join_notice_excludes_joiner() {
        let room = start_room("general");
        let (a, _a_box, mut a_rx) = member("A", &room, 16);
        let (b, _b_box, mut b_rx) = member("B", &room, 16);

        room.register(a.clone()).await.unwrap();
        room.register(b.clone()).await.unwrap();

        let notice = next_json(&mut a_rx).await;
        assert_eq!(notice["type"], "system");
        assert_eq!(notice["message"], "B joined the room");

        room.broadcast(Arc::from(r#"{"n":1}"#), Some(a.id()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut b_rx).await["n"], 1);

        assert_eq!(room.member_count().await, 2);
        let mut names = room.member_names().await;
        names.sort();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_register_visible_on_return() {
        let room = start_room("general");
        let (a, _a_box, _a_rx) = member("A", &room, 16);

        room.register(a.clone()).await.unwrap();
        assert!(room.contains(a.id()).await);
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_join_ignored() {
        let room = start_room("general");
        let (a, _a_box, _a_rx) = member("A", &room, 16);
        let (b, _b_box, mut b_rx) = member("B", &room, 16);

        room.register(b.clone()).await.unwrap();
        room.register(a.clone()).await.unwrap();
        room.register(a.clone()).await.unwrap();
        room.broadcast(Arc::from(r#"{"n":1}"#), None).await.unwrap();

        assert_eq!(next_json(&mut b_rx).await["message"], "A joined the room");
        assert_eq!(next_json(&mut b_rx).await["n"], 1);
        assert_eq!(room.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_leave_notice_keeps_outbox_open() {
        let room = start_room("general");
        let (a, _a_box, mut a_rx) = member("A", &room, 16);
        let (b, b_box, _b_rx) = member("B", &room, 16);

        room.register(a.clone()).await.unwrap();
        room.register(b.clone()).await.unwrap();
        next_json(&mut a_rx).await; // "B joined the room"

        room.unregister(b.id()).await.unwrap();
        assert_eq!(next_json(&mut a_rx).await["message"], "B left the room");
        assert!(!room.contains(b.id()).await);
        assert!(!b_box.is_closed());
    }

    #[tokio::test]
    async fn test_saturated_member_evicted() {
        let room = start_room("general");
        let (a, _a_box, mut a_rx) = member("A", &room, 16);
        let (slow, slow_box, _slow_rx) = member("Slow", &room, 1);

        room.register(slow.clone()).await.unwrap();
        room.register(a.clone()).await.unwrap();
        room.broadcast(Arc::from(r#"{"n":1}"#), Some(a.id()))
            .await
            .unwrap();
        room.broadcast(Arc::from(r#"{"n":2}"#), None).await.unwrap();

        // Slow's single slot was taken by "A joined the room"
        assert_eq!(next_json(&mut a_rx).await["n"], 2);
        assert!(slow_box.is_closed());
        assert!(!room.contains(slow.id()).await);
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_evicts_everyone() {
        let room = start_room("general");
        let (a, a_box, _a_rx) = member("A", &room, 16);
        let (b, b_box, _b_rx) = member("B", &room, 16);

        room.register(a).await.unwrap();
        room.register(b).await.unwrap();
        assert_eq!(room.member_count().await, 2);
        room.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while room.member_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("room did not close");

        assert!(a_box.is_closed());
        assert!(b_box.is_closed());
        // The loop has stopped, so further commands fail
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(room.broadcast(Arc::from("{}"), None).await.is_err());
    }
}
