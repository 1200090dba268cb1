//! SQLite store backend.
//!
//! One [`rusqlite::Connection`] behind a mutex serves all three store traits.
//! Timestamps are stored as integer milliseconds since the Unix epoch so that
//! range queries compare numerically.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    MessageStore, Result, RoomRecord, RoomStore, StoreError, StoredMessage, UserRecord, UserStore,
};
use crate::types::{RoomId, UserId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT    NOT NULL UNIQUE,
    salt          TEXT    NOT NULL,
    password_hash TEXT    NOT NULL,
    deleted       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rooms (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT    NOT NULL,
    capacity INTEGER NOT NULL,
    closed   INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_open_name ON rooms(name) WHERE closed = 0;

CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id   INTEGER NOT NULL REFERENCES users(id),
    room_id   INTEGER NOT NULL REFERENCES rooms(id),
    text      TEXT    NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_room_time ON messages(room_id, timestamp);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

/// Map unique-constraint failures onto [`StoreError::Conflict`].
fn conflict_or(err: rusqlite::Error, what: String) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(what)
        }
        other => StoreError::Sqlite(other),
    }
}

/// Smallest stored millisecond value not earlier than `at`
fn millis_at_or_after(at: DateTime<Utc>) -> i64 {
    let partial = at.timestamp_subsec_nanos() % 1_000_000 != 0;
    at.timestamp_millis() + i64::from(partial)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        salt: row.get(2)?,
        password_hash: row.get(3)?,
        deleted: row.get(4)?,
    })
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRecord> {
    Ok(RoomRecord {
        id: RoomId(row.get(0)?),
        name: row.get(1)?,
        capacity: row.get(2)?,
        closed: row.get(3)?,
    })
}

impl UserStore for SqliteStore {
    fn insert_user(&self, username: &str, salt: &str, password_hash: &str) -> Result<UserRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, salt, password_hash, deleted) VALUES (?1, ?2, ?3, 0)",
            params![username, salt, password_hash],
        )
        .map_err(|e| conflict_or(e, format!("user {username}")))?;

        Ok(UserRecord {
            id: UserId(conn.last_insert_rowid()),
            username: username.to_string(),
            salt: salt.to_string(),
            password_hash: password_hash.to_string(),
            deleted: false,
        })
    }

    fn find_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, salt, password_hash, deleted FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn update_password(&self, username: &str, salt: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE users SET salt = ?1, password_hash = ?2 WHERE username = ?3",
            params![salt, password_hash, username],
        )?;
        Ok(affected == 1)
    }

    fn mark_user_deleted(&self, username: &str) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE users SET deleted = 1 WHERE username = ?1",
            params![username],
        )?;
        Ok(affected == 1)
    }
}

impl RoomStore for SqliteStore {
    fn insert_room(&self, name: &str, capacity: u32) -> Result<RoomRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO rooms (name, capacity, closed) VALUES (?1, ?2, 0)",
            params![name, capacity],
        )
        .map_err(|e| conflict_or(e, format!("room {name}")))?;

        Ok(RoomRecord {
            id: RoomId(conn.last_insert_rowid()),
            name: name.to_string(),
            capacity,
            closed: false,
        })
    }

    fn find_room(&self, name: &str) -> Result<Option<RoomRecord>> {
        let conn = self.conn()?;
        let room = conn
            .query_row(
                "SELECT id, name, capacity, closed FROM rooms
                 WHERE name = ?1
                 ORDER BY closed ASC, id DESC
                 LIMIT 1",
                params![name],
                row_to_room,
            )
            .optional()?;
        Ok(room)
    }

    fn list_open_rooms(&self) -> Result<Vec<RoomRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, capacity, closed FROM rooms WHERE closed = 0 ORDER BY id")?;
        let rows = stmt.query_map([], row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    fn mark_room_closed(&self, id: RoomId) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE rooms SET closed = 1 WHERE id = ?1 AND closed = 0",
            params![id.0],
        )?;
        Ok(affected == 1)
    }
}

impl MessageStore for SqliteStore {
    fn append_message(
        &self,
        user: UserId,
        _username: &str,
        room: RoomId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (user_id, room_id, text, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![user.0, room.0, text, timestamp.timestamp_millis()],
        )?;
        Ok(())
    }

    fn messages_since(
        &self,
        room: RoomId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT u.username, m.text, m.timestamp
             FROM messages AS m
             JOIN users AS u ON m.user_id = u.id
             WHERE m.room_id = ?1 AND m.timestamp >= ?2
             ORDER BY m.timestamp ASC, m.id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![room.0, millis_at_or_after(since), limit as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;

        let mut messages = Vec::new();
        for row in rows {
            let (username, text, millis) = row?;
            let timestamp = DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| StoreError::Corrupt(format!("timestamp {millis}")))?;
            messages.push(StoredMessage {
                username,
                text,
                timestamp,
            });
        }
        Ok(messages)
    }
}
