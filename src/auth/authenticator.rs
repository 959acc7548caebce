//! Password and identity-claim logins.
//!
//! Both paths end in [`SessionAuthenticator::establish`], which rotates the session
//! id, stamps `last_login` and records a successful attempt. Denials are values, not
//! errors: callers render [`Denial::user_message`] and nothing else.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::error::Denial;
use super::password::CredentialHasher;
use super::rate_limit::{LoginRateLimiter, RateLimitDecision};
use super::sessions::{Principal, SessionRegistry};
use crate::store::{Account, AccountId, CredentialStore};

/// Session handed back to the client after a successful login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EstablishedSession {
    /// Raw session id for the cookie.
    pub token: String,
    pub principal: Principal,
}

pub type LoginOutcome = Result<EstablishedSession, Denial>;

#[derive(Clone)]
pub struct SessionAuthenticator {
    store: Arc<dyn CredentialStore>,
    limiter: LoginRateLimiter,
    hasher: Arc<CredentialHasher>,
    sessions: Arc<SessionRegistry>,
}

impl SessionAuthenticator {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        limiter: LoginRateLimiter,
        hasher: Arc<CredentialHasher>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            limiter,
            hasher,
            sessions,
        }
    }

    /// Username/password login.
    ///
    /// A limited pair is denied before the account is read, so the hash is never
    /// evaluated. Unknown usernames and inactive accounts go through the same
    /// verification and failure branch as a wrong password.
    #[instrument(skip(self, password, previous))]
    pub async fn login_with_password(
        &self,
        username: &str,
        password: &SecretString,
        origin: &str,
        previous: Option<&str>,
    ) -> LoginOutcome {
        let username = username.trim();
        if username.is_empty() || password.expose_secret().is_empty() {
            return Err(Denial::InvalidCredentials);
        }

        if self.limiter.admit(username, origin).await == RateLimitDecision::Limited {
            return Err(Denial::RateLimited);
        }

        let account = match self.store.account_by_username(username).await {
            Ok(account) => account,
            Err(err) => {
                error!("Failed to lookup account: {err:#}");
                return Err(Denial::Unavailable);
            }
        };

        let stored_hash = account.as_ref().map(|account| account.password_hash.as_str());
        let verified = match self.hasher.verify(password, stored_hash).await {
            Ok(verified) => verified,
            Err(err) => {
                error!("Failed to verify password: {err:#}");
                return Err(Denial::Unavailable);
            }
        };

        match account {
            Some(account) if verified && account.is_active => {
                self.establish(account, origin, previous).await
            }
            _ => {
                self.limiter.record(username, origin, false).await;
                info!("password login denied");
                Err(Denial::InvalidCredentials)
            }
        }
    }

    /// Login from an identity claim, typically a verifier's `matched` assertion.
    ///
    /// The claim carries no proof; it is accepted once the id resolves to an active
    /// account. An unresolved claim is denied without recording an attempt, since
    /// there is no username to attribute it to.
    #[instrument(skip(self, previous))]
    pub async fn login_with_claim(
        &self,
        account_id: AccountId,
        origin: &str,
        previous: Option<&str>,
    ) -> LoginOutcome {
        match self.store.account_by_id(account_id).await {
            Ok(Some(account)) if account.is_active => {
                self.establish(account, origin, previous).await
            }
            Ok(_) => {
                warn!("identity claim did not resolve to an active account");
                Err(Denial::UnknownIdentity)
            }
            Err(err) => {
                error!("Failed to resolve identity claim: {err:#}");
                Err(Denial::Unavailable)
            }
        }
    }

    async fn establish(
        &self,
        account: Account,
        origin: &str,
        previous: Option<&str>,
    ) -> LoginOutcome {
        let principal = Principal {
            account_id: account.id,
            username: account.username,
            role: account.role,
        };
        let token = match self.sessions.create(principal.clone(), previous).await {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to create session: {err:#}");
                return Err(Denial::Unavailable);
            }
        };
        if let Err(err) = self.store.touch_last_login(principal.account_id).await {
            error!("Failed to update last login: {err:#}");
        }
        self.limiter.record(&principal.username, origin, true).await;
        info!(account_id = principal.account_id, "login succeeded");
        Ok(EstablishedSession { token, principal })
    }

    /// Account behind a session. A session whose account no longer resolves, or is
    /// inactive, is destroyed and reported as absent.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached; the session is kept.
    pub async fn current_account(&self, token: &str) -> anyhow::Result<Option<Account>> {
        let Some(principal) = self.sessions.get(token).await else {
            return Ok(None);
        };
        let account = self.store.account_by_id(principal.account_id).await?;
        match account {
            Some(account) if account.is_active => Ok(Some(account)),
            _ => {
                warn!(
                    account_id = principal.account_id,
                    "session account no longer resolves, destroying session"
                );
                self.sessions.destroy(token).await;
                Ok(None)
            }
        }
    }

    /// Returns `true` when a session was removed.
    pub async fn logout(&self, token: &str) -> bool {
        self.sessions.destroy(token).await
    }
}
