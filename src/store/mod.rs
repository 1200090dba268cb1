//! Persistence collaborators
//!
//! The registries talk to storage only through the three traits below.
//! Each call is atomic on its own; callers that need check-then-act
//! atomicity across calls hold their own registry lock around them.
//!
//! Two backends ship with the crate: [`MemoryStore`] for development and
//! tests, and [`SqliteStore`] for a single-file database.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{RoomId, UserId};

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Unique constraint hit (username, open room name).
    #[error("Conflicting record: {0}")]
    Conflict(String),

    /// Stored data could not be interpreted.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Backend cannot serve requests (poisoned lock, closed handle).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias used throughout the store layer.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Row in the users table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub salt: String,
    pub password_hash: String,
    pub deleted: bool,
}

/// Row in the rooms table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    pub closed: bool,
}

/// Row in the messages table, joined with its author's username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

pub trait UserStore: Send + Sync {
    /// Insert a user; [`StoreError::Conflict`] if the username exists, deleted or not.
    fn insert_user(&self, username: &str, salt: &str, password_hash: &str) -> Result<UserRecord>;

    fn find_user(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Returns false when no such user exists.
    fn update_password(&self, username: &str, salt: &str, password_hash: &str) -> Result<bool>;

    /// Returns false when no such user exists.
    fn mark_user_deleted(&self, username: &str) -> Result<bool>;
}

pub trait RoomStore: Send + Sync {
    /// Insert an open room; [`StoreError::Conflict`] if an open room has the name.
    fn insert_room(&self, name: &str, capacity: u32) -> Result<RoomRecord>;

    /// Most recent room with this name, preferring an open one.
    fn find_room(&self, name: &str) -> Result<Option<RoomRecord>>;

    fn list_open_rooms(&self) -> Result<Vec<RoomRecord>>;

    /// Returns false when the room was missing or already closed.
    fn mark_room_closed(&self, id: RoomId) -> Result<bool>;
}

pub trait MessageStore: Send + Sync {
    fn append_message(
        &self,
        user: UserId,
        username: &str,
        room: RoomId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Messages at or after `since`, oldest first, at most `limit`.
    fn messages_since(
        &self,
        room: RoomId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;
}

/// The three store handles the server needs
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub rooms: Arc<dyn RoomStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    /// Serve all three tables from one backend
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: UserStore + RoomStore + MessageStore + 'static,
    {
        Self {
            users: store.clone(),
            rooms: store.clone(),
            messages: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }
}
