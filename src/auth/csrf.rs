//! Anti-forgery tokens bound to the session lifetime.

use anyhow::Result;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::sessions::SessionRegistry;

#[derive(Clone)]
pub struct TokenGuard {
    sessions: Arc<SessionRegistry>,
}

impl TokenGuard {
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// Token for the session, generated once and returned unchanged afterwards.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub async fn issue(&self, session: &str) -> Result<Option<String>> {
        self.sessions.bind_csrf_token(session).await
    }

    /// `false` when there is no session, no bound token, or the tokens differ.
    pub async fn verify(&self, session: Option<&str>, presented: Option<&str>) -> bool {
        let (Some(session), Some(presented)) = (session, presented) else {
            return false;
        };
        let Some(expected) = self.sessions.csrf_token(session).await else {
            return false;
        };
        expected.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sessions::Principal;
    use crate::store::Role;
    use std::time::Duration;

    async fn guard_with_session(registry: &Arc<SessionRegistry>) -> Result<String> {
        registry
            .create(
                Principal {
                    account_id: 1,
                    username: "abebe".to_string(),
                    role: Role::Voter,
                },
                None,
            )
            .await
    }

    #[tokio::test]
    async fn issue_is_idempotent() -> Result<()> {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let guard = TokenGuard::new(registry.clone());
        let session = guard_with_session(&registry).await?;
        let first = guard.issue(&session).await?;
        let second = guard.issue(&session).await?;
        assert!(first.is_some());
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn verify_accepts_only_the_bound_token() -> Result<()> {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let guard = TokenGuard::new(registry.clone());
        let session = guard_with_session(&registry).await?;
        let other_session = guard_with_session(&registry).await?;

        let token = guard.issue(&session).await?.unwrap_or_default();
        let other_token = guard.issue(&other_session).await?.unwrap_or_default();

        assert!(guard.verify(Some(&session), Some(&token)).await);
        assert!(!guard.verify(Some(&session), Some(&other_token)).await);
        assert!(!guard.verify(Some(&session), Some("forged")).await);
        assert!(!guard.verify(Some(&session), Some("")).await);
        assert!(!guard.verify(Some(&session), None).await);
        assert!(!guard.verify(None, Some(&token)).await);
        Ok(())
    }

    #[tokio::test]
    async fn verify_fails_without_bound_token() -> Result<()> {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let guard = TokenGuard::new(registry.clone());
        let session = guard_with_session(&registry).await?;
        assert!(!guard.verify(Some(&session), Some("anything")).await);
        Ok(())
    }

    #[tokio::test]
    async fn token_dies_with_session() -> Result<()> {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let guard = TokenGuard::new(registry.clone());
        let session = guard_with_session(&registry).await?;
        let token = guard.issue(&session).await?.unwrap_or_default();
        registry.destroy(&session).await;
        assert!(!guard.verify(Some(&session), Some(&token)).await);
        assert_eq!(guard.issue(&session).await?, None);
        Ok(())
    }
}
