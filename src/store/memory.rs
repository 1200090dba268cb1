//! In-memory store backend.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{
    MessageStore, Result, RoomRecord, RoomStore, StoreError, StoredMessage, UserRecord, UserStore,
};
use crate::types::{RoomId, UserId};

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<UserRecord>,
    rooms: Vec<RoomRecord>,
    messages: Vec<MessageRow>,
}

#[derive(Debug, Clone)]
struct MessageRow {
    room: RoomId,
    stored: StoredMessage,
}

/// Keeps every table in process memory; contents vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl UserStore for MemoryStore {
    fn insert_user(&self, username: &str, salt: &str, password_hash: &str) -> Result<UserRecord> {
        let mut state = self.state()?;
        if state.users.iter().any(|u| u.username == username) {
            return Err(StoreError::Conflict(format!("user {username}")));
        }
        let record = UserRecord {
            id: UserId(state.users.len() as i64 + 1),
            username: username.to_string(),
            salt: salt.to_string(),
            password_hash: password_hash.to_string(),
            deleted: false,
        };
        state.users.push(record.clone());
        Ok(record)
    }

    fn find_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let state = self.state()?;
        Ok(state.users.iter().find(|u| u.username == username).cloned())
    }

    fn update_password(&self, username: &str, salt: &str, password_hash: &str) -> Result<bool> {
        let mut state = self.state()?;
        match state.users.iter_mut().find(|u| u.username == username) {
            Some(user) => {
                user.salt = salt.to_string();
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_user_deleted(&self, username: &str) -> Result<bool> {
        let mut state = self.state()?;
        match state.users.iter_mut().find(|u| u.username == username) {
            Some(user) => {
                user.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl RoomStore for MemoryStore {
    fn insert_room(&self, name: &str, capacity: u32) -> Result<RoomRecord> {
        let mut state = self.state()?;
        if state.rooms.iter().any(|r| r.name == name && !r.closed) {
            return Err(StoreError::Conflict(format!("room {name}")));
        }
        let record = RoomRecord {
            id: RoomId(state.rooms.len() as i64 + 1),
            name: name.to_string(),
            capacity,
            closed: false,
        };
        state.rooms.push(record.clone());
        Ok(record)
    }

    fn find_room(&self, name: &str) -> Result<Option<RoomRecord>> {
        let state = self.state()?;
        let mut matching = state.rooms.iter().filter(|r| r.name == name);
        let open = matching.clone().find(|r| !r.closed);
        Ok(open.or_else(|| matching.next_back()).cloned())
    }

    fn list_open_rooms(&self) -> Result<Vec<RoomRecord>> {
        let state = self.state()?;
        Ok(state.rooms.iter().filter(|r| !r.closed).cloned().collect())
    }

    fn mark_room_closed(&self, id: RoomId) -> Result<bool> {
        let mut state = self.state()?;
        match state.rooms.iter_mut().find(|r| r.id == id && !r.closed) {
            Some(room) => {
                room.closed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl MessageStore for MemoryStore {
    fn append_message(
        &self,
        _user: UserId,
        username: &str,
        room: RoomId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state()?;
        state.messages.push(MessageRow {
            room,
            stored: StoredMessage {
                username: username.to_string(),
                text: text.to_string(),
                timestamp,
            },
        });
        Ok(())
    }

    fn messages_since(
        &self,
        room: RoomId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let state = self.state()?;
        let mut found: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| m.room == room && m.stored.timestamp >= since)
            .map(|m| m.stored.clone())
            .collect();
        // stable sort keeps insertion order among equal timestamps
        found.sort_by_key(|m| m.timestamp);
        found.truncate(limit);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_duplicate_user_conflicts() {
        let store = MemoryStore::new();
        store.insert_user("alice", "s", "h").unwrap();
        assert!(matches!(
            store.insert_user("alice", "s", "h"),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_closed_room_name_can_be_reused() {
        let store = MemoryStore::new();
        let first = store.insert_room("general", 2).unwrap();
        assert!(store.insert_room("general", 2).is_err());

        assert!(store.mark_room_closed(first.id).unwrap());
        assert!(store.find_room("general").unwrap().unwrap().closed);

        let second = store.insert_room("general", 5).unwrap();
        let found = store.find_room("general").unwrap().unwrap();
        assert_eq!(found.id, second.id);
        assert!(!found.closed);
        assert_eq!(store.list_open_rooms().unwrap().len(), 1);
    }

    #[test]
    fn test_messages_since_filters_and_orders() {
        let store = MemoryStore::new();
        let base = Utc::now();
        let room = RoomId(1);
        store
            .append_message(UserId(1), "a", room, "late", base + Duration::seconds(2))
            .unwrap();
        store
            .append_message(UserId(1), "a", room, "old", base - Duration::seconds(5))
            .unwrap();
        store
            .append_message(UserId(1), "a", room, "early", base)
            .unwrap();
        store
            .append_message(UserId(1), "a", RoomId(2), "elsewhere", base)
            .unwrap();

        let texts: Vec<String> = store
            .messages_since(room, base, 10)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["early", "late"]);

        assert_eq!(store.messages_since(room, base, 1).unwrap().len(), 1);
    }
}
