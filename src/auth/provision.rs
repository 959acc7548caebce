//! Account provisioning.
//!
//! `register` validates the input without side effects, hashes the password, parses
//! the optional face descriptor, and only then opens a store transaction that writes
//! the account plus exactly one role record. Any failure rolls the transaction back, so
//! a rejected registration leaves no account, no role record and no biometric data.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::error::{ReferenceKind, RegistrationError};
use super::password::CredentialHasher;
use super::utils::{normalize_email, valid_email};
use crate::biometric::{BiometricError, FaceEncoding};
use crate::store::{
    AccountId, CandidateRecord, CredentialStore, NewAccount, Role, StoreTransaction, UniqueField,
    VoterRecord,
};

pub const MIN_PASSWORD_LENGTH: usize = 6;
// Column widths in `users`.
pub const MAX_FULL_NAME_LENGTH: usize = 100;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MAX_EMAIL_LENGTH: usize = 100;

/// Raw registration form.
#[derive(Debug)]
pub struct RegistrationInput {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub role: String,
    pub district: Option<String>,
    pub category: Option<String>,
    /// JSON array of floats, as produced by the verifier's extraction endpoint.
    pub face_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RoleSelection {
    Voter { district: String },
    Candidate { category: String },
}

impl RoleSelection {
    const fn role(&self) -> Role {
        match self {
            Self::Voter { .. } => Role::Voter,
            Self::Candidate { .. } => Role::Candidate,
        }
    }
}

#[derive(Debug)]
struct ValidRegistration {
    full_name: String,
    username: String,
    email: String,
    password: SecretString,
    selection: RoleSelection,
    face_data: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate(input: RegistrationInput) -> Result<ValidRegistration, RegistrationError> {
    let full_name = input.full_name.trim().to_string();
    let username = input.username.trim().to_string();
    let email = normalize_email(&input.email);
    let role = input.role.trim().to_lowercase();

    if full_name.is_empty()
        || username.is_empty()
        || email.is_empty()
        || input.password.expose_secret().trim().is_empty()
        || role.is_empty()
    {
        return Err(RegistrationError::Validation(
            "All fields are required".to_string(),
        ));
    }
    for (field, value, max) in [
        ("Full name", &full_name, MAX_FULL_NAME_LENGTH),
        ("Username", &username, MAX_USERNAME_LENGTH),
        ("Email", &email, MAX_EMAIL_LENGTH),
    ] {
        if value.chars().count() > max {
            return Err(RegistrationError::Validation(format!(
                "{field} must be at most {max} characters long"
            )));
        }
    }
    if !valid_email(&email) {
        return Err(RegistrationError::Validation(
            "Invalid email format".to_string(),
        ));
    }
    if input.password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
        return Err(RegistrationError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )));
    }

    let selection = match role.parse::<Role>() {
        Ok(Role::Voter) => RoleSelection::Voter {
            district: trimmed(input.district).ok_or_else(|| {
                RegistrationError::Validation("District is required for voters".to_string())
            })?,
        },
        Ok(Role::Candidate) => RoleSelection::Candidate {
            category: trimmed(input.category).ok_or_else(|| {
                RegistrationError::Validation("Candidate category is required".to_string())
            })?,
        },
        Ok(Role::Admin) | Err(_) => {
            return Err(RegistrationError::Validation(
                "Invalid role selected".to_string(),
            ))
        }
    };

    Ok(ValidRegistration {
        full_name,
        username,
        email,
        password: input.password,
        selection,
        face_data: input.face_data,
    })
}

pub struct AccountProvisioner {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<CredentialHasher>,
}

impl AccountProvisioner {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, hasher: Arc<CredentialHasher>) -> Self {
        Self { store, hasher }
    }

    /// Create an account and its role record atomically.
    ///
    /// # Errors
    /// See [`RegistrationError`]; every variant leaves the store unchanged.
    #[instrument(skip_all, fields(username = %input.username.trim(), role = %input.role.trim()))]
    pub async fn register(&self, input: RegistrationInput) -> Result<AccountId, RegistrationError> {
        let result = self.provision(input).await;
        match &result {
            Ok(account_id) => info!(account_id, "account registered"),
            Err(err @ RegistrationError::Store(_)) => error!("Registration failed: {err}"),
            Err(err) => info!("Registration rejected: {err}"),
        }
        result
    }

    async fn provision(&self, input: RegistrationInput) -> Result<AccountId, RegistrationError> {
        let valid = validate(input)?;

        // Advisory only: a concurrent registration can still win the race, in which
        // case the unique constraint reports the conflict at insert or commit.
        if self.store.username_taken(&valid.username).await? {
            return Err(RegistrationError::Conflict(UniqueField::Username));
        }
        if self.store.email_taken(&valid.email).await? {
            return Err(RegistrationError::Conflict(UniqueField::Email));
        }

        let password_hash = self
            .hasher
            .hash(&valid.password)
            .await
            .map_err(RegistrationError::Store)?;

        let encoding = FaceEncoding::parse(valid.face_data.as_deref())?;
        if encoding.is_none() && valid.selection.role() == Role::Voter {
            return Err(BiometricError::Missing.into());
        }

        let account = NewAccount {
            full_name: valid.full_name,
            username: valid.username,
            email: valid.email,
            password_hash,
            role: valid.selection.role(),
            face_encoding: encoding.as_ref().map(FaceEncoding::to_json),
        };

        let mut tx = self.store.begin().await?;
        match write_records(tx.as_mut(), &account, &valid.selection).await {
            Ok(account_id) => {
                tx.commit().await?;
                Ok(account_id)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Failed to roll back registration: {rollback_err}");
                }
                Err(err)
            }
        }
    }
}

async fn write_records(
    tx: &mut dyn StoreTransaction,
    account: &NewAccount,
    selection: &RoleSelection,
) -> Result<AccountId, RegistrationError> {
    let account_id = tx.insert_account(account).await?;
    match selection {
        RoleSelection::Voter { district } => {
            let district_id = tx
                .district_id(district)
                .await?
                .ok_or(RegistrationError::Reference(ReferenceKind::District))?;
            tx.insert_voter(&VoterRecord {
                account_id,
                district_id,
                voter_id: None,
            })
            .await?;
        }
        RoleSelection::Candidate { category } => {
            let category_id = tx
                .category_id(category)
                .await?
                .ok_or(RegistrationError::Reference(ReferenceKind::Category))?;
            tx.insert_candidate(&CandidateRecord {
                account_id,
                category_id,
                party: None,
                manifesto: None,
            })
            .await?;
        }
    }
    Ok(account_id)
}
