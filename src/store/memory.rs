//! In-process credential store.
//!
//! Tables live behind one `tokio::sync::Mutex`. Transactions stage their writes
//! locally and apply them under the lock on commit, after re-checking username and
//! email uniqueness against committed rows. A dropped transaction discards its
//! staged rows. Account ids come from a shared counter, so ids burnt by a
//! rolled-back transaction are skipped, same as a database sequence.

use super::{
    Account, AccountId, CandidateRecord, CredentialStore, LoginAttempt, NewAccount, RoleDetails,
    StoreError, StoreTransaction, UniqueField, VoterRecord,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_DISTRICTS: [&str; 10] = [
    "Addis Ketema",
    "Akaki Kality",
    "Arada",
    "Bole",
    "Gullele",
    "Kirkos",
    "Kolfe Keranio",
    "Lideta",
    "Nifas Silk-Lafto",
    "Yeka",
];

pub const DEFAULT_CATEGORIES: [&str; 3] = ["Federal", "Regional", "Local"];

#[derive(Debug, Default)]
struct Tables {
    accounts: Vec<Account>,
    voters: Vec<VoterRecord>,
    candidates: Vec<CandidateRecord>,
    districts: Vec<(i64, String)>,
    categories: Vec<(i64, String)>,
    attempts: Vec<LoginAttempt>,
}

impl Tables {
    fn conflict_with(&self, account: &NewAccount) -> Option<UniqueField> {
        if self.accounts.iter().any(|a| a.username == account.username) {
            return Some(UniqueField::Username);
        }
        if self.accounts.iter().any(|a| a.email == account.email) {
            return Some(UniqueField::Email);
        }
        None
    }
}

#[derive(Clone, Debug)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    next_account_id: Arc<AtomicI64>,
    fail_next_commit: Arc<AtomicBool>,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store seeded with the default districts and candidate categories.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reference_data(&DEFAULT_DISTRICTS, &DEFAULT_CATEGORIES)
    }

    #[must_use]
    pub fn with_reference_data(districts: &[&str], categories: &[&str]) -> Self {
        let tables = Tables {
            districts: numbered(districts),
            categories: numbered(categories),
            ..Tables::default()
        };
        Self {
            tables: Arc::new(Mutex::new(tables)),
            next_account_id: Arc::new(AtomicI64::new(1)),
            fail_next_commit: Arc::new(AtomicBool::new(false)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next commit fail as if the backend dropped the connection.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// While offline every operation returns a backend error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert a fully formed account directly, bypassing the provisioner.
    pub async fn seed_account(&self, mut account: Account) -> AccountId {
        let id = self.next_account_id.fetch_add(1, Ordering::SeqCst);
        account.id = id;
        self.tables.lock().await.accounts.push(account);
        id
    }

    pub async fn set_active(&self, id: AccountId, active: bool) {
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables.accounts.iter_mut().find(|a| a.id == id) {
            account.is_active = active;
        }
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.tables.lock().await.accounts.clone()
    }

    pub async fn voters(&self) -> Vec<VoterRecord> {
        self.tables.lock().await.voters.clone()
    }

    pub async fn candidates(&self) -> Vec<CandidateRecord> {
        self.tables.lock().await.candidates.clone()
    }

    pub async fn login_attempts(&self) -> Vec<LoginAttempt> {
        self.tables.lock().await.attempts.clone()
    }

    pub async fn district_id_of(&self, name: &str) -> Option<i64> {
        lookup(&self.tables.lock().await.districts, name)
    }

    pub async fn category_id_of(&self, name: &str) -> Option<i64> {
        lookup(&self.tables.lock().await.categories, name)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("memory store is offline")));
        }
        Ok(())
    }
}

fn numbered(names: &[&str]) -> Vec<(i64, String)> {
    names
        .iter()
        .zip(1_i64..)
        .map(|(name, id)| (id, (*name).to_string()))
        .collect()
}

fn lookup(table: &[(i64, String)], name: &str) -> Option<i64> {
    table
        .iter()
        .find(|(_, entry)| entry == name)
        .map(|(id, _)| *id)
}

fn name_of(table: &[(i64, String)], id: i64) -> Option<String> {
    table
        .iter()
        .find(|(entry_id, _)| *entry_id == id)
        .map(|(_, name)| name.clone())
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.check_online()?;
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            accounts: Vec::new(),
            voters: Vec::new(),
            candidates: Vec::new(),
        }))
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .iter()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.accounts.iter().any(|a| a.username == username))
    }

    async fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.accounts.iter().any(|a| a.email == email))
    }

    async fn role_details(&self, account: &Account) -> Result<Option<RoleDetails>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let voter = tables
            .voters
            .iter()
            .find(|v| v.account_id == account.id)
            .and_then(|v| {
                name_of(&tables.districts, v.district_id).map(|district| RoleDetails::Voter {
                    district,
                    voter_id: v.voter_id.clone(),
                })
            });
        if voter.is_some() {
            return Ok(voter);
        }
        Ok(tables
            .candidates
            .iter()
            .find(|c| c.account_id == account.id)
            .and_then(|c| {
                name_of(&tables.categories, c.category_id).map(|category| {
                    RoleDetails::Candidate {
                        category,
                        party: c.party.clone(),
                        manifesto: c.manifesto.clone(),
                    }
                })
            }))
    }

    async fn update_candidate_profile(
        &self,
        account_id: AccountId,
        party: Option<&str>,
        manifesto: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let Some(candidate) = tables
            .candidates
            .iter_mut()
            .find(|c| c.account_id == account_id)
        else {
            return Ok(false);
        };
        candidate.party = party.map(str::to_string);
        candidate.manifesto = manifesto.map(str::to_string);
        Ok(true)
    }

    async fn touch_last_login(&self, id: AccountId) -> Result<(), StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables.accounts.iter_mut().find(|a| a.id == id) {
            account.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        self.check_online()?;
        self.tables.lock().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn count_failed_attempts(
        &self,
        username: &str,
        origin: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let count = tables
            .attempts
            .iter()
            .filter(|a| {
                a.username == username && a.origin == origin && !a.success && a.attempted_at > since
            })
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn district_names(&self) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        let mut names: Vec<String> = self
            .tables
            .lock()
            .await
            .districts
            .iter()
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn category_names(&self) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        let mut names: Vec<String> = self
            .tables
            .lock()
            .await
            .categories
            .iter()
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}

pub struct MemoryTransaction {
    store: MemoryStore,
    accounts: Vec<Account>,
    voters: Vec<VoterRecord>,
    candidates: Vec<CandidateRecord>,
}

impl MemoryTransaction {
    fn staged_account(&self, id: AccountId) -> bool {
        self.accounts.iter().any(|a| a.id == id)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_account(&mut self, account: &NewAccount) -> Result<AccountId, StoreError> {
        self.store.check_online()?;
        if let Some(field) = self.store.tables.lock().await.conflict_with(account) {
            return Err(StoreError::Conflict(field));
        }
        if self.accounts.iter().any(|a| a.username == account.username) {
            return Err(StoreError::Conflict(UniqueField::Username));
        }
        if self.accounts.iter().any(|a| a.email == account.email) {
            return Err(StoreError::Conflict(UniqueField::Email));
        }

        let id = self.store.next_account_id.fetch_add(1, Ordering::SeqCst);
        self.accounts.push(Account {
            id,
            full_name: account.full_name.clone(),
            username: account.username.clone(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
            role: account.role,
            face_image: None,
            face_encoding: account.face_encoding.clone(),
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        });
        Ok(id)
    }

    async fn district_id(&mut self, name: &str) -> Result<Option<i64>, StoreError> {
        self.store.check_online()?;
        Ok(lookup(&self.store.tables.lock().await.districts, name))
    }

    async fn category_id(&mut self, name: &str) -> Result<Option<i64>, StoreError> {
        self.store.check_online()?;
        Ok(lookup(&self.store.tables.lock().await.categories, name))
    }

    async fn insert_voter(&mut self, voter: &VoterRecord) -> Result<(), StoreError> {
        self.store.check_online()?;
        if !self.staged_account(voter.account_id) {
            return Err(StoreError::Backend(anyhow!(
                "voter references unknown account {}",
                voter.account_id
            )));
        }
        self.voters.push(voter.clone());
        Ok(())
    }

    async fn insert_candidate(&mut self, candidate: &CandidateRecord) -> Result<(), StoreError> {
        self.store.check_online()?;
        if !self.staged_account(candidate.account_id) {
            return Err(StoreError::Backend(anyhow!(
                "candidate references unknown account {}",
                candidate.account_id
            )));
        }
        self.candidates.push(candidate.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let store = self.store.clone();
        store.check_online()?;
        let mut tables = store.tables.lock().await;

        if store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("injected commit failure")));
        }

        for account in &self.accounts {
            if tables.accounts.iter().any(|a| a.username == account.username) {
                return Err(StoreError::Conflict(UniqueField::Username));
            }
            if tables.accounts.iter().any(|a| a.email == account.email) {
                return Err(StoreError::Conflict(UniqueField::Email));
            }
        }

        let MemoryTransaction {
            accounts,
            voters,
            candidates,
            ..
        } = *self;
        debug!(accounts = accounts.len(), "memory transaction committed");
        tables.accounts.extend(accounts);
        tables.voters.extend(voters);
        tables.candidates.extend(candidates);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
