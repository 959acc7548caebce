use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_VERIFIER_URL: &str = "verifier-url";
pub const ARG_VERIFIER_TIMEOUT_SECONDS: &str = "verifier-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub verifier_url: String,
    pub verifier_timeout: Duration,
}

impl Options {
    /// Parse face verifier arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let verifier_url = matches
            .get_one::<String>(ARG_VERIFIER_URL)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_VERIFIER_URL}"))?;
        let timeout = matches
            .get_one::<u64>(ARG_VERIFIER_TIMEOUT_SECONDS)
            .copied()
            .filter(|seconds| *seconds > 0)
            .ok_or_else(|| anyhow!("--{ARG_VERIFIER_TIMEOUT_SECONDS} must be positive"))?;

        Ok(Self {
            verifier_url,
            verifier_timeout: Duration::from_secs(timeout),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFIER_URL)
                .long(ARG_VERIFIER_URL)
                .help("Base URL of the face recognition service")
                .env("VOTEGATE_VERIFIER_URL")
                .default_value("http://127.0.0.1:5000"),
        )
        .arg(
            Arg::new(ARG_VERIFIER_TIMEOUT_SECONDS)
                .long(ARG_VERIFIER_TIMEOUT_SECONDS)
                .help("Seconds to wait for the face recognition service")
                .env("VOTEGATE_VERIFIER_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}
