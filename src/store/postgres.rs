//! `PostgreSQL` credential store.

use super::{
    Account, AccountId, CandidateRecord, CredentialStore, LoginAttempt, NewAccount, Role,
    RoleDetails, StoreError, StoreTransaction, UniqueField, VoterRecord,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, Row,
};
use std::time::Duration;
use tracing::{Instrument, Span};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the pool settings used by the server.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Map a unique violation on `accounts` to the field it guards.
fn unique_field(err: &sqlx::Error) -> Option<UniqueField> {
    if !is_unique_violation(err) {
        return None;
    }
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    match db_err.constraint() {
        Some(constraint) if constraint.contains("email") => Some(UniqueField::Email),
        _ => Some(UniqueField::Username),
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let role = role
        .parse::<Role>()
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
    Ok(Account {
        id: row.try_get("id")?,
        full_name: row.try_get("full_name")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role,
        face_image: row.try_get("face_image")?,
        face_encoding: row.try_get("face_encoding")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        last_login: row.try_get("last_login")?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, full_name, username, email, password_hash, role, face_image, face_encoding, is_active, created_at, last_login";

#[async_trait]
impl CredentialStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .context("begin registration transaction")?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", "SELECT ... FROM accounts WHERE id = $1"))
            .await
            .context("failed to lookup account by id")?;
        let account = row
            .as_ref()
            .map(account_from_row)
            .transpose()
            .context("failed to decode account")?;
        Ok(account)
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1");
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(query_span(
                "SELECT",
                "SELECT ... FROM accounts WHERE username = $1",
            ))
            .await
            .context("failed to lookup account by username")?;
        let account = row
            .as_ref()
            .map(account_from_row)
            .transpose()
            .context("failed to decode account")?;
        Ok(account)
    }

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE username = $1)";
        let taken: bool = sqlx::query_scalar(query)
            .bind(username)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check username")?;
        Ok(taken)
    }

    async fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
        let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1)";
        let taken: bool = sqlx::query_scalar(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check email")?;
        Ok(taken)
    }

    async fn role_details(&self, account: &Account) -> Result<Option<RoleDetails>, StoreError> {
        match account.role {
            Role::Voter => {
                let query = r"
                    SELECT d.name AS district, v.voter_id
                    FROM voters v
                    JOIN districts d ON d.id = v.district_id
                    WHERE v.account_id = $1
                ";
                let row = sqlx::query(query)
                    .bind(account.id)
                    .fetch_optional(&self.pool)
                    .instrument(query_span("SELECT", query))
                    .await
                    .context("failed to load voter record")?;
                let details = row
                    .map(|row| -> Result<RoleDetails, sqlx::Error> {
                        Ok(RoleDetails::Voter {
                            district: row.try_get("district")?,
                            voter_id: row.try_get("voter_id")?,
                        })
                    })
                    .transpose()
                    .context("failed to decode voter record")?;
                Ok(details)
            }
            Role::Candidate => {
                let query = r"
                    SELECT c.name AS category, k.party, k.manifesto
                    FROM candidates k
                    JOIN candidate_categories c ON c.id = k.category_id
                    WHERE k.account_id = $1
                ";
                let row = sqlx::query(query)
                    .bind(account.id)
                    .fetch_optional(&self.pool)
                    .instrument(query_span("SELECT", query))
                    .await
                    .context("failed to load candidate record")?;
                let details = row
                    .map(|row| -> Result<RoleDetails, sqlx::Error> {
                        Ok(RoleDetails::Candidate {
                            category: row.try_get("category")?,
                            party: row.try_get("party")?,
                            manifesto: row.try_get("manifesto")?,
                        })
                    })
                    .transpose()
                    .context("failed to decode candidate record")?;
                Ok(details)
            }
            Role::Admin => Ok(None),
        }
    }

    async fn update_candidate_profile(
        &self,
        account_id: AccountId,
        party: Option<&str>,
        manifesto: Option<&str>,
    ) -> Result<bool, StoreError> {
        let query = "UPDATE candidates SET party = $2, manifesto = $3 WHERE account_id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(party)
            .bind(manifesto)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update candidate profile")?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_login(&self, id: AccountId) -> Result<(), StoreError> {
        let query = "UPDATE accounts SET last_login = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update last login")?;
        Ok(())
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO login_attempts (username, origin, attempted_at, success)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&attempt.username)
            .bind(&attempt.origin)
            .bind(attempt.attempted_at)
            .bind(attempt.success)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert login attempt")?;
        Ok(())
    }

    async fn count_failed_attempts(
        &self,
        username: &str,
        origin: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let query = r"
            SELECT COUNT(*) FROM login_attempts
            WHERE username = $1 AND origin = $2 AND success = FALSE AND attempted_at > $3
        ";
        let count: i64 = sqlx::query_scalar(query)
            .bind(username)
            .bind(origin)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to count login attempts")?;
        Ok(count)
    }

    async fn district_names(&self) -> Result<Vec<String>, StoreError> {
        let query = "SELECT name FROM districts ORDER BY name";
        let names: Vec<String> = sqlx::query_scalar(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list districts")?;
        Ok(names)
    }

    async fn category_names(&self) -> Result<Vec<String>, StoreError> {
        let query = "SELECT name FROM candidate_categories ORDER BY name";
        let names: Vec<String> = sqlx::query_scalar(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list candidate categories")?;
        Ok(names)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

/// Open registration transaction. Dropping it without `commit` rolls back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert_account(&mut self, account: &NewAccount) -> Result<AccountId, StoreError> {
        let query = r"
            INSERT INTO accounts
                (full_name, username, email, password_hash, role, face_encoding)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(&account.full_name)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .bind(account.face_encoding.as_deref())
            .fetch_one(&mut *self.tx)
            .instrument(query_span("INSERT", query))
            .await;

        match row {
            Ok(row) => Ok(row.try_get("id").context("failed to read account id")?),
            Err(err) => match unique_field(&err) {
                Some(field) => Err(StoreError::Conflict(field)),
                None => Err(anyhow::Error::new(err)
                    .context("failed to insert account")
                    .into()),
            },
        }
    }

    async fn district_id(&mut self, name: &str) -> Result<Option<i64>, StoreError> {
        let query = "SELECT id FROM districts WHERE name = $1";
        let id: Option<i64> = sqlx::query_scalar(query)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to resolve district")?;
        Ok(id)
    }

    async fn category_id(&mut self, name: &str) -> Result<Option<i64>, StoreError> {
        let query = "SELECT id FROM candidate_categories WHERE name = $1";
        let id: Option<i64> = sqlx::query_scalar(query)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to resolve candidate category")?;
        Ok(id)
    }

    async fn insert_voter(&mut self, voter: &VoterRecord) -> Result<(), StoreError> {
        let query = "INSERT INTO voters (account_id, district_id, voter_id) VALUES ($1, $2, $3)";
        sqlx::query(query)
            .bind(voter.account_id)
            .bind(voter.district_id)
            .bind(voter.voter_id.as_deref())
            .execute(&mut *self.tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert voter record")?;
        Ok(())
    }

    async fn insert_candidate(&mut self, candidate: &CandidateRecord) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO candidates (account_id, category_id, party, manifesto)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(candidate.account_id)
            .bind(candidate.category_id)
            .bind(candidate.party.as_deref())
            .bind(candidate.manifesto.as_deref())
            .execute(&mut *self.tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert candidate record")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|err| match unique_field(&err) {
                Some(field) => StoreError::Conflict(field),
                None => anyhow::Error::new(err)
                    .context("commit registration transaction")
                    .into(),
            })
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .context("rollback registration transaction")?;
        Ok(())
    }
}
