//! Sliding-window login throttling per (username, origin).
//!
//! Counts come from the append-only login attempt log, so the window survives restarts
//! and is shared by every process using the same store. The check is not atomic with
//! the attempt that follows it; concurrent requests may overshoot the limit by one.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, warn};

use crate::store::{CredentialStore, LoginAttempt};

const DEFAULT_MAX_FAILURES: i64 = 5;
/// Upper bound on the window; keeps `now - window` inside the store's timestamp range.
pub const MAX_WINDOW_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginPolicy {
    max_failures: i64,
    window: Duration,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            window: Duration::minutes(15),
        }
    }
}

impl LoginPolicy {
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: i64) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Returns `None` unless `seconds` lies in `1..=MAX_WINDOW_SECONDS`.
    #[must_use]
    pub fn try_with_window_seconds(mut self, seconds: i64) -> Option<Self> {
        if !(1..=MAX_WINDOW_SECONDS).contains(&seconds) {
            return None;
        }
        self.window = Duration::try_seconds(seconds)?;
        Some(self)
    }

    #[must_use]
    pub fn max_failures(&self) -> i64 {
        self.max_failures
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

#[derive(Clone)]
pub struct LoginRateLimiter {
    store: Arc<dyn CredentialStore>,
    policy: LoginPolicy,
}

impl LoginRateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, policy: LoginPolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub fn policy(&self) -> LoginPolicy {
        self.policy
    }

    /// Limited once the pair has `max_failures` failed attempts inside the window.
    /// Store errors fail closed.
    pub async fn admit(&self, username: &str, origin: &str) -> RateLimitDecision {
        let since = Utc::now() - self.policy.window;
        match self
            .store
            .count_failed_attempts(username, origin, since)
            .await
        {
            Ok(failures) if failures >= self.policy.max_failures => {
                warn!(username, origin, failures, "login rate limit reached");
                RateLimitDecision::Limited
            }
            Ok(_) => RateLimitDecision::Allowed,
            Err(err) => {
                error!("Failed to count login attempts: {err:#}");
                RateLimitDecision::Limited
            }
        }
    }

    /// Append an attempt to the log. Failures are logged and swallowed.
    pub async fn record(&self, username: &str, origin: &str, success: bool) {
        let attempt = LoginAttempt {
            username: username.to_string(),
            origin: origin.to_string(),
            attempted_at: Utc::now(),
            success,
        };
        if let Err(err) = self.store.insert_login_attempt(&attempt).await {
            error!("Failed to record login attempt: {err:#}");
        }
    }
}
