//! Rooms and the room registry
//!
//! A room is a named broadcast group with a static capacity. Capacity bounds
//! ordinary members only; privileged members (server admins) are exempt.
//! The registry caches open rooms in memory in front of the [`RoomStore`];
//! all membership changes happen under its single lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::store::{RoomRecord, RoomStore, StoreError};
use crate::types::{ClientId, RoomId};

/// Capacity-bounded chat room
///
/// Members are connection handles, not users: one user on two connections
/// occupies two slots.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Static ceiling on ordinary members; never changes after creation
    pub capacity: u32,
    pub closed: bool,
    members: HashSet<ClientId>,
    privileged: HashSet<ClientId>,
}

impl From<RoomRecord> for Room {
    fn from(record: RoomRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            capacity: record.capacity,
            closed: record.closed,
            members: HashSet::new(),
            privileged: HashSet::new(),
        }
    }
}

impl Room {
    /// Check if no ordinary slot is left
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity as usize
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.privileged.is_empty()
    }

    pub fn contains(&self, member: ClientId) -> bool {
        self.members.contains(&member) || self.privileged.contains(&member)
    }

    /// Ordinary plus privileged members
    pub fn member_count(&self) -> usize {
        self.members.len() + self.privileged.len()
    }

    /// Snapshot of every member handle
    pub fn members(&self) -> Vec<ClientId> {
        self.members
            .iter()
            .chain(self.privileged.iter())
            .copied()
            .collect()
    }

    /// Add a member; re-joining is a no-op
    pub fn add_member(&mut self, member: ClientId, privileged: bool) -> Result<(), ChatError> {
        if self.closed {
            return Err(ChatError::RoomClosed(self.name.clone()));
        }
        if self.contains(member) {
            return Ok(());
        }
        if privileged {
            self.privileged.insert(member);
            return Ok(());
        }
        if self.is_full() {
            return Err(ChatError::RoomFull(self.name.clone()));
        }
        self.members.insert(member);
        Ok(())
    }

    /// Remove a member, returning whether it was present
    pub fn remove_member(&mut self, member: ClientId) -> bool {
        self.members.remove(&member) || self.privileged.remove(&member)
    }
}

pub struct RoomRegistry {
    store: Arc<dyn RoomStore>,
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self {
            store,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Open room by name, loading it into the cache on first use
    fn load<'a>(
        store: &dyn RoomStore,
        rooms: &'a mut HashMap<String, Room>,
        name: &str,
    ) -> Result<&'a mut Room, ChatError> {
        if !rooms.contains_key(name) {
            let record = store
                .find_room(name)?
                .ok_or_else(|| ChatError::RoomNotFound(name.to_string()))?;
            if record.closed {
                return Err(ChatError::RoomClosed(name.to_string()));
            }
            debug!(room = name, "room cached");
            rooms.insert(name.to_string(), record.into());
        }
        rooms
            .get_mut(name)
            .ok_or_else(|| ChatError::RoomNotFound(name.to_string()))
    }

    pub async fn create(&self, name: &str, capacity: u32) -> Result<Room, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidRequest("room name cannot be empty".to_string()));
        }
        if capacity == 0 {
            return Err(ChatError::InvalidRequest(
                "room capacity must be at least 1".to_string(),
            ));
        }

        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(name) {
            return Err(ChatError::DuplicateRoom(name.to_string()));
        }

        let room: Room = match self.store.insert_room(name, capacity) {
            Ok(record) => record.into(),
            Err(StoreError::Conflict(_)) => return Err(ChatError::DuplicateRoom(name.to_string())),
            Err(e) => return Err(e.into()),
        };

        info!(room = name, capacity, "room created");
        rooms.insert(name.to_string(), room.clone());
        Ok(room)
    }

    /// Snapshot of an open room
    pub async fn get(&self, name: &str) -> Result<Room, ChatError> {
        let mut rooms = self.rooms.lock().await;
        Self::load(self.store.as_ref(), &mut rooms, name).map(|room| room.clone())
    }

    /// Names of all open rooms, sorted
    pub async fn list_names(&self) -> Result<Vec<String>, ChatError> {
        let mut names: Vec<String> = self
            .store
            .list_open_rooms()?
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Add `member` and return the member snapshot after the join
    pub async fn join(
        &self,
        name: &str,
        member: ClientId,
        privileged: bool,
    ) -> Result<Vec<ClientId>, ChatError> {
        let mut rooms = self.rooms.lock().await;
        let room = Self::load(self.store.as_ref(), &mut rooms, name)?;
        room.add_member(member, privileged)?;
        debug!(room = name, client_id = %member, count = room.member_count(), "member joined");
        Ok(room.members())
    }

    /// Remove `member` and return the remaining members
    pub async fn leave(&self, name: &str, member: ClientId) -> Result<Vec<ClientId>, ChatError> {
        let mut rooms = self.rooms.lock().await;
        let room = Self::load(self.store.as_ref(), &mut rooms, name)?;
        if !room.remove_member(member) {
            return Err(ChatError::MemberNotPresent(name.to_string()));
        }
        debug!(room = name, client_id = %member, count = room.member_count(), "member left");
        Ok(room.members())
    }

    pub async fn is_member(&self, name: &str, member: ClientId) -> Result<bool, ChatError> {
        let mut rooms = self.rooms.lock().await;
        let room = Self::load(self.store.as_ref(), &mut rooms, name)?;
        Ok(room.contains(member))
    }

    pub async fn members(&self, name: &str) -> Result<Vec<ClientId>, ChatError> {
        let mut rooms = self.rooms.lock().await;
        let room = Self::load(self.store.as_ref(), &mut rooms, name)?;
        Ok(room.members())
    }

    /// Close a room for good
    ///
    /// The returned room still lists the members it had, so the caller can
    /// notify them; the registry itself no longer holds any of them.
    pub async fn close(&self, name: &str) -> Result<Room, ChatError> {
        let mut rooms = self.rooms.lock().await;
        let room = Self::load(self.store.as_ref(), &mut rooms, name)?;
        self.store.mark_room_closed(room.id)?;

        let mut closed = rooms
            .remove(name)
            .ok_or_else(|| ChatError::RoomNotFound(name.to_string()))?;
        closed.closed = true;

        info!(room = name, evicted = closed.member_count(), "room closed");
        Ok(closed)
    }

    /// Remove `member` from every room it is in, returning those room names
    pub async fn evict(&self, member: ClientId) -> Vec<String> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .values_mut()
            .filter_map(|room| room.remove_member(member).then(|| room.name.clone()))
            .collect()
    }
}
