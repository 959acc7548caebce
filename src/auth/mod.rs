//! Identity and session trust.
//!
//! - [`AccountProvisioner`]: validated, all-or-nothing account creation.
//! - [`SessionAuthenticator`]: password and identity-claim logins.
//! - [`LoginRateLimiter`]: failed-attempt window per (username, origin).
//! - [`TokenGuard`]: anti-forgery tokens bound to a session.
//!
//! Each component receives the store handle it needs at construction.

pub mod authenticator;
pub mod csrf;
pub mod error;
pub mod password;
pub mod provision;
pub mod rate_limit;
pub mod sessions;
pub(crate) mod utils;

pub use authenticator::{EstablishedSession, LoginOutcome, SessionAuthenticator};
pub use csrf::TokenGuard;
pub use error::{Denial, ReferenceKind, RegistrationError};
pub use password::{CredentialHasher, HashingParams};
pub use provision::{AccountProvisioner, RegistrationInput, MIN_PASSWORD_LENGTH};
pub use rate_limit::{LoginPolicy, LoginRateLimiter, RateLimitDecision};
pub use sessions::{Principal, SessionRegistry};
