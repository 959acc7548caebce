//! # Votegate (Registration & Login Gateway)
//!
//! `votegate` admits people into a closed-membership voting system. It registers
//! voters and candidates, authenticates them by password or by a face match performed
//! by an external recognition service, and keeps the resulting sessions.
//!
//! ## Registration
//!
//! An account and its role record are written in one transaction. Voters are bound to a
//! district and must enroll a face descriptor; candidates are bound to a category.
//! Uniqueness of username and email is decided by the store at commit, so concurrent
//! registrations cannot both win.
//!
//! ## Login
//!
//! Password logins are throttled per `(username, origin)` over a sliding window backed by
//! the login attempt log. Unknown usernames and wrong passwords are indistinguishable to
//! the caller, including in timing. Face logins ask the verifier for an account id and
//! then hand off to the same session establishment path.
//!
//! ## Sessions
//!
//! Session identifiers are random, rotated on every login and stored only as digests.
//! State-changing requests on an established session carry an anti-forgery token bound
//! to that session.

pub mod api;
pub mod auth;
pub mod biometric;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}
