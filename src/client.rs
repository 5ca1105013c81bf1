//! Client handle definition
//!
//! A passive record for one connected participant: identity, display name
//! and the outbound queue. The Hub and Rooms only see it through the
//! `Participant` capability.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AppError, DeliveryError};
use crate::message::encode;
use crate::outbox::Outbox;
use crate::types::ClientId;

/// Display name used when the client did not supply one
pub const ANONYMOUS: &str = "Anonymous";

/// What a broadcast scope needs to know about a recipient
pub trait Participant: fmt::Debug + Send + Sync {
    fn id(&self) -> ClientId;

    fn display_name(&self) -> &str;

    /// The recipient's outbound queue
    fn outbox(&self) -> &Outbox;
}

/// Shared reference to a participant, as stored in member sets
pub type Member = Arc<dyn Participant>;

/// Connected client information
#[derive(Debug)]
pub struct ClientHandle {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Display name (not unique)
    pub username: String,
    outbox: Outbox,
}

impl ClientHandle {
    /// Create a new client handle
    ///
    /// A missing or empty username falls back to `"Anonymous"`.
    pub fn new(id: ClientId, username: Option<String>, outbox: Outbox) -> Self {
        let username = username
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_string());
        Self {
            id,
            username,
            outbox,
        }
    }

    /// Serialize a record and queue it for this client
    ///
    /// Waits for queue capacity; fails if the outbox is closed.
    pub async fn send<T: Serialize>(&self, msg: &T) -> Result<(), AppError> {
        let payload = encode(msg)?;
        self.outbox
            .deliver(payload)
            .await
            .map_err(|_: DeliveryError| AppError::ChannelSend)
    }
}

impl Participant for ClientHandle {
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
