//! Error types for the chat server
//!
//! Defines application-level errors and outbound delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (reported to the client as `room_error`).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - a command loop is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// Inbound record is valid JSON but not a known shape
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Room not found with the given id
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Client is not in the room it tried to leave
    #[error("Not in room")]
    NotInRoom,
}

impl AppError {
    /// Whether the error should terminate the connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::WebSocket(_) | AppError::Io(_) | AppError::ChannelSend
        )
    }
}

/// Outbound delivery errors
///
/// Returned when a payload cannot be placed on a client's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The queue is at capacity (unresponsive recipient)
    #[error("Outbound queue full")]
    Full,
    /// The queue has been closed
    #[error("Outbound queue closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::ChannelSend.is_fatal());
        assert!(!AppError::NotInRoom.is_fatal());
        assert!(!AppError::RoomNotFound("x".to_string()).is_fatal());
        assert!(!AppError::InvalidMessage("x".to_string()).is_fatal());
    }
}
