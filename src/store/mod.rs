//! Credential store seam.
//!
//! Every component that touches persisted identity state (the provisioner, the
//! authenticator and the login rate limiter) receives an `Arc<dyn CredentialStore>`
//! explicitly. Two implementations exist:
//!
//! - [`PgStore`]: `PostgreSQL` via `sqlx`, schema in `sql/schema.sql`.
//! - [`MemoryStore`]: in-process tables with the same transactional contract, used by
//!   the test suite and by `--dsn memory://` for local runs.
//!
//! ## Transactions
//!
//! Writes that must be atomic (an account plus its role record) go through
//! [`CredentialStore::begin`]. A [`StoreTransaction`] that is dropped without
//! `commit` leaves no trace, so a cancelled request never orphans rows.
//!
//! Uniqueness of usernames and emails is enforced by the store, not by callers:
//! any insert or commit that would duplicate one returns [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type AccountId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Voter,
    Candidate,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Voter => "voter",
            Self::Candidate => "candidate",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "voter" => Ok(Self::Voter),
            "candidate" => Ok(Self::Candidate),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Persisted identity record.
#[derive(Clone, Debug)]
pub struct Account {
    pub id: AccountId,
    pub full_name: String,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub role: Role,
    pub face_image: Option<String>,
    /// JSON array of the enrolled face descriptor.
    pub face_encoding: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Account fields written by the provisioner.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub face_encoding: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoterRecord {
    pub account_id: AccountId,
    pub district_id: i64,
    pub voter_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateRecord {
    pub account_id: AccountId,
    pub category_id: i64,
    pub party: Option<String>,
    pub manifesto: Option<String>,
}

/// Role extension data resolved to display names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleDetails {
    Voter {
        district: String,
        voter_id: Option<String>,
    },
    Candidate {
        category: String,
        party: Option<String>,
        manifesto: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub username: String,
    pub origin: String,
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => f.write_str("username"),
            Self::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(UniqueField),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    /// Advisory existence check; the unique constraint is authoritative.
    async fn username_taken(&self, username: &str) -> Result<bool, StoreError>;

    /// Advisory existence check; the unique constraint is authoritative.
    async fn email_taken(&self, email: &str) -> Result<bool, StoreError>;

    /// Role record for the account, `None` for admins.
    async fn role_details(&self, account: &Account) -> Result<Option<RoleDetails>, StoreError>;

    /// Returns `false` when the account has no candidate record.
    async fn update_candidate_profile(
        &self,
        account_id: AccountId,
        party: Option<&str>,
        manifesto: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn touch_last_login(&self, id: AccountId) -> Result<(), StoreError>;

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError>;

    /// Failed attempts for the pair strictly after `since`.
    async fn count_failed_attempts(
        &self,
        username: &str,
        origin: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    async fn district_names(&self) -> Result<Vec<String>, StoreError>;

    async fn category_names(&self) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_account(&mut self, account: &NewAccount) -> Result<AccountId, StoreError>;

    async fn district_id(&mut self, name: &str) -> Result<Option<i64>, StoreError>;

    async fn category_id(&mut self, name: &str) -> Result<Option<i64>, StoreError>;

    async fn insert_voter(&mut self, voter: &VoterRecord) -> Result<(), StoreError>;

    async fn insert_candidate(&mut self, candidate: &CandidateRecord) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
