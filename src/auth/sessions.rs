//! Server-side session registry.
//!
//! The raw session id only ever lives in the client cookie; the registry is keyed by
//! its SHA-256 digest. Entries expire after the configured TTL and expired entries are
//! pruned whenever a new session is created.

use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::utils::{generate_token, hash_session_token};
use crate::store::{AccountId, Role};

/// Identity bound to an authenticated session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub account_id: AccountId,
    pub username: String,
    pub role: Role,
}

struct SessionEntry {
    principal: Principal,
    csrf_token: Option<String>,
    created_at: Instant,
}

pub struct SessionRegistry {
    ttl: Duration,
    sessions: Mutex<HashMap<Vec<u8>, SessionEntry>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session for `principal` and return its raw id.
    ///
    /// A `previous` id presented by the client is destroyed, so every login hands out
    /// a fresh identifier.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub async fn create(&self, principal: Principal, previous: Option<&str>) -> Result<String> {
        let token = generate_token()?;
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        if let Some(previous) = previous {
            if sessions.remove(&hash_session_token(previous)).is_some() {
                debug!("rotated previous session");
            }
        }
        sessions.insert(
            hash_session_token(&token),
            SessionEntry {
                principal,
                csrf_token: None,
                created_at: Instant::now(),
            },
        );
        Ok(token)
    }

    pub async fn get(&self, token: &str) -> Option<Principal> {
        let key = hash_session_token(token);
        let mut sessions = self.sessions.lock().await;
        let expired = sessions
            .get(&key)
            .is_some_and(|entry| entry.created_at.elapsed() >= self.ttl);
        if expired {
            sessions.remove(&key);
            return None;
        }
        sessions.get(&key).map(|entry| entry.principal.clone())
    }

    /// Returns `true` when a session was removed.
    pub async fn destroy(&self, token: &str) -> bool {
        self.sessions
            .lock()
            .await
            .remove(&hash_session_token(token))
            .is_some()
    }

    /// Anti-forgery token bound to the session, generated on first call.
    /// `None` when the session does not exist or has expired.
    pub(crate) async fn bind_csrf_token(&self, token: &str) -> Result<Option<String>> {
        let key = hash_session_token(token);
        let mut sessions = self.sessions.lock().await;
        let expired = sessions
            .get(&key)
            .is_some_and(|entry| entry.created_at.elapsed() >= self.ttl);
        if expired {
            sessions.remove(&key);
            return Ok(None);
        }
        let Some(entry) = sessions.get_mut(&key) else {
            return Ok(None);
        };
        if let Some(existing) = &entry.csrf_token {
            return Ok(Some(existing.clone()));
        }
        let csrf = generate_token()?;
        entry.csrf_token = Some(csrf.clone());
        Ok(Some(csrf))
    }

    pub(crate) async fn csrf_token(&self, token: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&hash_session_token(token))
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .and_then(|entry| entry.csrf_token.clone())
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            account_id: 7,
            username: "abebe".to_string(),
            role: Role::Voter,
        }
    }

    #[tokio::test]
    async fn create_and_get() -> Result<()> {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let token = registry.create(principal(), None).await?;
        assert_eq!(registry.get(&token).await, Some(principal()));
        assert_eq!(registry.get("unknown").await, None);
        Ok(())
    }

    #[tokio::test]
    async fn create_rotates_previous_session() -> Result<()> {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let first = registry.create(principal(), None).await?;
        let second = registry.create(principal(), Some(&first)).await?;
        assert_ne!(first, second);
        assert_eq!(registry.get(&first).await, None);
        assert!(registry.get(&second).await.is_some());
        assert_eq!(registry.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn destroy_removes_session() -> Result<()> {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let token = registry.create(principal(), None).await?;
        assert!(registry.destroy(&token).await);
        assert!(!registry.destroy(&token).await);
        assert_eq!(registry.get(&token).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn expired_sessions_resolve_to_none() -> Result<()> {
        let registry = SessionRegistry::new(Duration::ZERO);
        let token = registry.create(principal(), None).await?;
        assert_eq!(registry.get(&token).await, None);
        assert_eq!(registry.bind_csrf_token(&token).await?, None);
        Ok(())
    }
}
