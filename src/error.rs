//! Error types for the chat server
//!
//! Defines wire-level errors (fatal to a connection) and command-level
//! errors (reported back to the caller). Uses thiserror for ergonomic
//! error definitions.

use thiserror::Error;

use crate::message::CommandKind;
use crate::store::StoreError;
use crate::types::ClientId;

/// Wire protocol errors
///
/// Every variant ends the connection's handler loop.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peer closed the connection (cleanly or mid-frame)
    #[error("Connection closed")]
    ConnectionClosed,

    /// Length prefix exceeds the frame limit
    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// Frame body is not a valid message envelope
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// IO error on the underlying socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad error classes used for logging and reply decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad credentials or invalid/expired token
    Auth,
    /// Room or user missing
    NotFound,
    /// Duplicate name, full room, closed room, absent member
    Conflict,
    /// Storage collaborator failure
    Store,
    /// Request that is well-formed but unusable
    Request,
}

/// Command-level errors
///
/// Recoverable: the dispatcher turns each one into a reply for the
/// initiating connection and keeps the loop running.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Token missing, unknown, superseded or expired
    #[error("Token is invalid")]
    InvalidToken,

    /// Password hash does not match
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User has been deleted: {0}")]
    UserDeleted(String),

    #[error("Username already taken: {0}")]
    DuplicateUser(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room is closed: {0}")]
    RoomClosed(String),

    #[error("Room already exists: {0}")]
    DuplicateRoom(String),

    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Leave or send from a connection that is not in the room
    #[error("Not a member of room: {0}")]
    MemberNotPresent(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Server-only message kinds sent by a client
    #[error("Unexpected command: {0:?}")]
    UnexpectedCommand(CommandKind),

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::InvalidToken | ChatError::InvalidCredentials | ChatError::UserDeleted(_) => {
                ErrorCategory::Auth
            }
            ChatError::UserNotFound(_) | ChatError::RoomNotFound(_) => ErrorCategory::NotFound,
            ChatError::DuplicateUser(_)
            | ChatError::RoomClosed(_)
            | ChatError::DuplicateRoom(_)
            | ChatError::RoomFull(_)
            | ChatError::MemberNotPresent(_) => ErrorCategory::Conflict,
            ChatError::Store(_) => ErrorCategory::Store,
            ChatError::InvalidRequest(_) | ChatError::UnexpectedCommand(_) => {
                ErrorCategory::Request
            }
        }
    }
}

/// Message send errors
///
/// Occurs when pushing to a connection whose outbound queue has closed.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel to {0} closed")]
    ChannelClosed(ClientId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(ChatError::InvalidToken.category(), ErrorCategory::Auth);
        assert_eq!(
            ChatError::RoomNotFound("x".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            ChatError::RoomFull("x".into()).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            ChatError::Store(StoreError::Unavailable("down".into())).category(),
            ErrorCategory::Store
        );
    }

    #[test]
    fn test_display() {
        let err = ChatError::DuplicateRoom("general".into());
        assert_eq!(err.to_string(), "Room already exists: general");
    }
}
