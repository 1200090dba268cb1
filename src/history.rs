//! Room message log
//!
//! Append-only chat history per room, replayed to members that join late.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::ChatError;
use crate::message::TextMessage;
use crate::room::Room;
use crate::store::MessageStore;
use crate::user::User;

/// Default cap on messages returned by one backfill
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One persisted chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    pub username: String,
    pub room: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl From<RoomMessage> for TextMessage {
    fn from(message: RoomMessage) -> Self {
        Self {
            username: message.username,
            room: message.room,
            text: message.text,
            timestamp: message.timestamp,
        }
    }
}

pub struct MessageLog {
    store: Arc<dyn MessageStore>,
    limit: usize,
}

impl MessageLog {
    pub fn new(store: Arc<dyn MessageStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    /// Persist one line stamped with the current time
    ///
    /// Timestamps are truncated to milliseconds, the precision stores keep.
    pub fn append(&self, user: &User, room: &Room, text: &str) -> Result<RoomMessage, ChatError> {
        let timestamp = Utc::now().trunc_subsecs(3);
        self.store
            .append_message(user.id, &user.username, room.id, text, timestamp)?;
        Ok(RoomMessage {
            username: user.username.clone(),
            room: room.name.clone(),
            text: text.to_string(),
            timestamp,
        })
    }

    /// Lines at or after `since`, oldest first
    pub fn since(&self, room: &Room, since: DateTime<Utc>) -> Result<Vec<RoomMessage>, ChatError> {
        let stored = self.store.messages_since(room.id, since, self.limit)?;
        Ok(stored
            .into_iter()
            .map(|m| RoomMessage {
                username: m.username,
                room: room.name.clone(),
                text: m.text,
                timestamp: m.timestamp,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RoomStore, SqliteStore, UserStore};
    use chrono::Duration;

    fn fixtures<S: UserStore + RoomStore>(store: &S) -> (User, Room) {
        let user: User = store.insert_user("alice", "s", "h").unwrap().into();
        let room: Room = store.insert_room("general", 4).unwrap().into();
        (user, room)
    }

    #[test]
    fn test_append_then_since() {
        let store = Arc::new(MemoryStore::new());
        let (user, room) = fixtures(store.as_ref());
        let log = MessageLog::new(store, DEFAULT_HISTORY_LIMIT);

        let before = Utc::now() - Duration::seconds(1);
        let first = log.append(&user, &room, "hello").unwrap();
        log.append(&user, &room, "again").unwrap();

        let history = log.since(&room, before).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], first);
        assert_eq!(history[1].text, "again");
        assert!(history[0].timestamp <= history[1].timestamp);

        let later = Utc::now() + Duration::seconds(60);
        assert!(log.since(&room, later).unwrap().is_empty());
    }

    #[test]
    fn test_history_never_precedes_cutoff() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (user, room) = fixtures(store.as_ref());
        let log = MessageLog::new(store, 3);

        for i in 0..5 {
            log.append(&user, &room, &format!("line {i}")).unwrap();
        }
        let cutoff = Utc::now() - Duration::minutes(5);
        let history = log.since(&room, cutoff).unwrap();

        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|m| m.timestamp >= cutoff));
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(history[0].text, "line 0");
    }
}
