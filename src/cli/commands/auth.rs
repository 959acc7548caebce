use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::auth::{rate_limit::MAX_WINDOW_SECONDS, HashingParams, LoginPolicy};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";
pub const ARG_LOGIN_MAX_FAILURES: &str = "login-max-failures";
pub const ARG_LOGIN_WINDOW_SECONDS: &str = "login-window-seconds";
pub const ARG_ARGON2_MEMORY_KIB: &str = "argon2-memory-kib";
pub const ARG_ARGON2_ITERATIONS: &str = "argon2-iterations";
pub const ARG_ARGON2_PARALLELISM: &str = "argon2-parallelism";

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub session_ttl_seconds: u64,
    pub trust_forwarded_for: bool,
    pub login_policy: LoginPolicy,
    pub hashing: HashingParams,
}

impl Options {
    /// Parse session, throttling and hashing arguments from matches.
    ///
    /// # Errors
    /// Returns an error if an argument is missing or out of range.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_FRONTEND_BASE_URL}"))?;

        let session_ttl_seconds = required::<u64>(matches, ARG_SESSION_TTL_SECONDS)?;
        if session_ttl_seconds == 0 {
            return Err(anyhow!("--{ARG_SESSION_TTL_SECONDS} must be positive"));
        }

        let max_failures = required::<i64>(matches, ARG_LOGIN_MAX_FAILURES)?;
        if max_failures < 1 {
            return Err(anyhow!("--{ARG_LOGIN_MAX_FAILURES} must be positive"));
        }
        let window_seconds = required::<i64>(matches, ARG_LOGIN_WINDOW_SECONDS)?;
        let login_policy = LoginPolicy::default()
            .with_max_failures(max_failures)
            .try_with_window_seconds(window_seconds)
            .ok_or_else(|| {
                anyhow!("--{ARG_LOGIN_WINDOW_SECONDS} must be between 1 and {MAX_WINDOW_SECONDS}")
            })?;

        Ok(Self {
            frontend_base_url,
            session_ttl_seconds,
            trust_forwarded_for: matches.get_flag(ARG_TRUST_FORWARDED_FOR),
            login_policy,
            hashing: HashingParams {
                memory_kib: required::<u32>(matches, ARG_ARGON2_MEMORY_KIB)?,
                iterations: required::<u32>(matches, ARG_ARGON2_ITERATIONS)?,
                parallelism: required::<u32>(matches, ARG_ARGON2_PARALLELISM)?,
            },
        })
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| anyhow!("missing required argument: --{id}"))
}

pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_throttle_args(command);
    with_hashing_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL; sets the CORS origin and the cookie Secure flag")
                .env("VOTEGATE_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds")
                .env("VOTEGATE_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long(ARG_TRUST_FORWARDED_FOR)
                .help("Rate-limit by X-Forwarded-For; only behind a proxy that overwrites it")
                .env("VOTEGATE_TRUST_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
}

fn with_throttle_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_MAX_FAILURES)
                .long(ARG_LOGIN_MAX_FAILURES)
                .help("Failed logins allowed per username and origin within the window")
                .env("VOTEGATE_LOGIN_MAX_FAILURES")
                .default_value("5")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_WINDOW_SECONDS)
                .long(ARG_LOGIN_WINDOW_SECONDS)
                .help("Sliding window for failed logins in seconds")
                .env("VOTEGATE_LOGIN_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_hashing_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ARGON2_MEMORY_KIB)
                .long(ARG_ARGON2_MEMORY_KIB)
                .help("Argon2id memory cost in KiB")
                .env("VOTEGATE_ARGON2_MEMORY_KIB")
                .default_value("65536")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_ITERATIONS)
                .long(ARG_ARGON2_ITERATIONS)
                .help("Argon2id iteration count")
                .env("VOTEGATE_ARGON2_ITERATIONS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_PARALLELISM)
                .long(ARG_ARGON2_PARALLELISM)
                .help("Argon2id lanes")
                .env("VOTEGATE_ARGON2_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
}
