//! Session registry
//!
//! Maps issued tokens to authenticated usernames. Each user holds at most
//! one live token; issuing again replaces it. Expiry is checked lazily when
//! a token is validated, so no background sweep runs.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::SessionToken;

/// Default session lifetime
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// One authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub token: SessionToken,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Sessions {
    by_token: HashMap<SessionToken, Session>,
    by_user: HashMap<String, SessionToken>,
}

impl Sessions {
    fn remove_user(&mut self, username: &str) -> Option<Session> {
        let token = self.by_user.remove(username)?;
        self.by_token.remove(&token)
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    ttl: Duration,
    sessions: Mutex<Sessions>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_SESSION_TTL_HOURS))
    }
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Issue a fresh token for `username`, superseding any previous one
    pub async fn issue(&self, username: &str) -> SessionToken {
        self.issue_at(username, Utc::now()).await
    }

    pub async fn issue_at(&self, username: &str, now: DateTime<Utc>) -> SessionToken {
        let mut sessions = self.sessions.lock().await;

        let token = loop {
            let candidate = SessionToken::generate();
            if !sessions.by_token.contains_key(&candidate) {
                break candidate;
            }
        };

        if sessions.remove_user(username).is_some() {
            debug!(username, "previous session superseded");
        }

        sessions.by_user.insert(username.to_string(), token.clone());
        sessions.by_token.insert(
            token.clone(),
            Session {
                username: username.to_string(),
                token: token.clone(),
                issued_at: now,
            },
        );
        token
    }

    /// Resolve a token to its session, evicting it if expired
    pub async fn validate(&self, token: &SessionToken) -> Option<Session> {
        self.validate_at(token, Utc::now()).await
    }

    pub async fn validate_at(&self, token: &SessionToken, now: DateTime<Utc>) -> Option<Session> {
        if token.is_empty() {
            return None;
        }

        let mut sessions = self.sessions.lock().await;
        let session = sessions.by_token.get(token)?.clone();

        if now - session.issued_at > self.ttl {
            debug!(username = %session.username, "session expired");
            sessions.remove_user(&session.username);
            return None;
        }

        Some(session)
    }

    /// Drop the live session of `username`, if any
    pub async fn revoke(&self, username: &str) -> bool {
        self.sessions.lock().await.remove_user(username).is_some()
    }

    /// Number of sessions currently held (expired ones included until read)
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.by_token.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_then_validate() {
        let registry = SessionRegistry::default();
        let token = registry.issue("alice").await;

        let session = registry.validate(&token).await.expect("valid");
        assert_eq!(session.username, "alice");
        assert_eq!(session.token, token);
    }

    #[tokio::test]
    async fn test_unknown_and_empty_tokens() {
        let registry = SessionRegistry::default();
        registry.issue("alice").await;

        assert!(registry
            .validate(&SessionToken("nope".into()))
            .await
            .is_none());
        assert!(registry.validate(&SessionToken::empty()).await.is_none());
    }

    #[tokio::test]
    async fn test_reissue_supersedes() {
        let registry = SessionRegistry::default();
        let old = registry.issue("alice").await;
        let new = registry.issue("alice").await;

        assert_ne!(old, new);
        assert!(registry.validate(&old).await.is_none());
        assert!(registry.validate(&new).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_expiry_window() {
        let registry = SessionRegistry::default();
        let issued = Utc::now();
        let token = registry.issue_at("alice", issued).await;

        let just_inside = issued + Duration::hours(24);
        assert!(registry.validate_at(&token, just_inside).await.is_some());

        let past = issued + Duration::hours(24) + Duration::seconds(1);
        assert!(registry.validate_at(&token, past).await.is_none());

        // lazily evicted
        assert!(registry.is_empty().await);
        assert!(registry.validate_at(&token, issued).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke() {
        let registry = SessionRegistry::default();
        let token = registry.issue("alice").await;

        assert!(registry.revoke("alice").await);
        assert!(!registry.revoke("alice").await);
        assert!(registry.validate(&token).await.is_none());
    }
}
