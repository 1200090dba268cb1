//! Connection handles
//!
//! Each live socket is represented by a [`ConnectionHandle`] holding the
//! sending side of its outbound queue. Rooms refer to connections by
//! [`ClientId`] only; the [`Connections`] table resolves ids to handles.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};

use crate::error::SendError;
use crate::message::Message;
use crate::types::ClientId;

/// Connected client information
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Authenticated username (None before login)
    pub username: Option<String>,
    /// Server → client message queue
    pub sender: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    pub fn new(id: ClientId, sender: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            username: None,
            sender,
        }
    }

    /// Queue a message for this connection's writer
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed(self.id))
    }
}

/// Table of live connections
#[derive(Debug, Default)]
pub struct Connections {
    handles: Mutex<HashMap<ClientId, ConnectionHandle>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: ConnectionHandle) {
        self.handles.lock().await.insert(handle.id, handle);
    }

    pub async fn remove(&self, id: ClientId) -> Option<ConnectionHandle> {
        self.handles.lock().await.remove(&id)
    }

    /// Record which user a connection authenticated as
    pub async fn set_username(&self, id: ClientId, username: &str) {
        if let Some(handle) = self.handles.lock().await.get_mut(&id) {
            handle.username = Some(username.to_string());
        }
    }

    /// Clone the handles for `ids`, skipping ones already gone
    pub async fn resolve(&self, ids: &[ClientId]) -> Vec<ConnectionHandle> {
        let handles = self.handles.lock().await;
        ids.iter().filter_map(|id| handles.get(id).cloned()).collect()
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CommandKind;

    #[tokio::test]
    async fn test_handle_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let handle = ConnectionHandle::new(ClientId::new(), tx);

        assert!(handle.username.is_none());
    }

    #[tokio::test]
    async fn test_send_to_closed_connection_fails() {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(ClientId::new(), tx);
        drop(rx);

        let result = handle.send(Message::notice(CommandKind::Register, "x")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_table_resolves_and_records_username() {
        let table = Connections::new();
        let (tx, _rx) = mpsc::channel(1);
        let known = ClientId::new();
        table.insert(ConnectionHandle::new(known, tx)).await;
        table.set_username(known, "alice").await;

        let resolved = table.resolve(&[known, ClientId::new()]).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].username.as_deref(), Some("alice"));

        assert!(table.remove(known).await.is_some());
        assert!(table.is_empty().await);
    }
}
