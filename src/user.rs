//! User directory
//!
//! Authenticates credentials and owns user records. A `username -> User`
//! cache sits in front of the [`UserStore`]; it is filled on first lookup
//! and invalidated whenever a record changes here. The admin CLI changes the
//! store from another process, so logins and token checks use
//! [`UserDirectory::refresh`] rather than the cached copy.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::password::{generate_salt, hash_password, verify_password};
use crate::session::SessionRegistry;
use crate::store::{StoreError, UserRecord, UserStore};
use crate::types::UserId;

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub salt: String,
    pub password_hash: String,
    pub deleted: bool,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            username: record.username,
            salt: record.salt,
            password_hash: record.password_hash,
            deleted: record.deleted,
        }
    }
}

pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    sessions: Arc<SessionRegistry>,
    cache: Mutex<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            sessions,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Create a user from the client-side password hash
    ///
    /// Usernames stay taken after deletion.
    pub async fn register(&self, username: &str, password_hash: &str) -> Result<User, ChatError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::InvalidRequest("username cannot be empty".to_string()));
        }
        if password_hash.is_empty() {
            return Err(ChatError::InvalidRequest("password cannot be empty".to_string()));
        }

        let mut cache = self.cache.lock().await;
        let salt = generate_salt();
        let salted = hash_password(password_hash, &salt);

        let user: User = match self.store.insert_user(username, &salt, &salted) {
            Ok(record) => record.into(),
            Err(StoreError::Conflict(_)) => {
                return Err(ChatError::DuplicateUser(username.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        info!(username, user_id = %user.id, "user registered");
        cache.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    /// Look a user up, deleted or not
    pub async fn get(&self, username: &str) -> Result<User, ChatError> {
        let mut cache = self.cache.lock().await;
        if let Some(user) = cache.get(username) {
            return Ok(user.clone());
        }

        let user: User = self
            .store
            .find_user(username)?
            .ok_or_else(|| ChatError::UserNotFound(username.to_string()))?
            .into();

        debug!(username, "user cached");
        cache.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    /// Re-read a user from the store, replacing the cached copy
    pub async fn refresh(&self, username: &str) -> Result<User, ChatError> {
        let mut cache = self.cache.lock().await;
        let Some(record) = self.store.find_user(username)? else {
            cache.remove(username);
            return Err(ChatError::UserNotFound(username.to_string()));
        };

        let user: User = record.into();
        cache.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    /// Check a client-side password hash against the stored salted hash
    pub async fn authenticate(&self, username: &str, password_hash: &str) -> Result<User, ChatError> {
        let user = self.refresh(username).await?;
        if user.deleted {
            return Err(ChatError::UserDeleted(user.username));
        }
        if !verify_password(password_hash, &user.salt, &user.password_hash) {
            return Err(ChatError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn change_password(&self, username: &str, password_hash: &str) -> Result<(), ChatError> {
        if password_hash.is_empty() {
            return Err(ChatError::InvalidRequest("password cannot be empty".to_string()));
        }

        let mut cache = self.cache.lock().await;
        let salt = generate_salt();
        let salted = hash_password(password_hash, &salt);

        if !self.store.update_password(username, &salt, &salted)? {
            return Err(ChatError::UserNotFound(username.to_string()));
        }

        cache.remove(username);
        info!(username, "password changed");
        Ok(())
    }

    /// Soft-delete a user and end their live session
    pub async fn delete(&self, username: &str) -> Result<(), ChatError> {
        let mut cache = self.cache.lock().await;
        if !self.store.mark_user_deleted(username)? {
            return Err(ChatError::UserNotFound(username.to_string()));
        }
        cache.remove(username);
        drop(cache);

        if self.sessions.revoke(username).await {
            debug!(username, "session revoked on delete");
        }
        info!(username, "user deleted");
        Ok(())
    }
}
