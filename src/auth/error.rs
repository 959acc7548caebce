//! User-facing outcomes for registration and login.
//!
//! Every variant maps to exactly one message that is safe to show to the client. The
//! `Display` form may carry more detail and is meant for server logs only.

use std::fmt;

use crate::biometric::BiometricError;
use crate::store::{StoreError, UniqueField};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    District,
    Category,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::District => f.write_str("district"),
            Self::Category => f.write_str("candidate category"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} already exists")]
    Conflict(UniqueField),
    #[error("unresolved {0}")]
    Reference(ReferenceKind),
    #[error(transparent)]
    Biometric(#[from] BiometricError),
    #[error("storage failure: {0:#}")]
    Store(anyhow::Error),
}

impl RegistrationError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Conflict(UniqueField::Username) => "Username already exists".to_string(),
            Self::Conflict(UniqueField::Email) => "Email already exists".to_string(),
            Self::Reference(kind) => format!("Invalid {kind} selected."),
            Self::Biometric(BiometricError::Missing) => {
                "Face capture and processing failed or was not completed.".to_string()
            }
            Self::Biometric(BiometricError::Malformed) => {
                "Invalid face encoding data received.".to_string()
            }
            Self::Store(_) => "Registration failed. Please try again later.".to_string(),
        }
    }

    /// Whether the client can fix the request and retry.
    #[must_use]
    pub fn is_user_correctable(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => Self::Conflict(field),
            StoreError::Backend(err) => Self::Store(err),
        }
    }
}

/// Why a login did not produce a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("too many failed attempts")]
    RateLimited,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("identity claim did not resolve")]
    UnknownIdentity,
    #[error("authentication backend unavailable")]
    Unavailable,
}

const GENERIC_LOGIN_DENIAL: &str = "Invalid username or password.";

impl Denial {
    /// Rate limiting and bad credentials share one message.
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::RateLimited | Self::InvalidCredentials => GENERIC_LOGIN_DENIAL,
            Self::UnknownIdentity => "User not found based on recognition result.",
            Self::Unavailable => "Login is temporarily unavailable. Please try again later.",
        }
    }
}
