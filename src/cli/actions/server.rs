use crate::{
    api::{self, AppState, GatewayConfig},
    auth::{CredentialHasher, HashingParams, LoginPolicy},
    biometric::HttpFaceVerifier,
    cli::telemetry,
    store::{memory::MemoryStore, postgres::PgStore, CredentialStore},
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

const MEMORY_DSN_SCHEME: &str = "memory";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub session_ttl_seconds: u64,
    pub trust_forwarded_for: bool,
    pub login_policy: LoginPolicy,
    pub hashing: HashingParams,
    pub verifier_url: String,
    pub verifier_timeout: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be reached, the verifier URL is invalid, or the
/// server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store = open_store(&args.dsn).await?;
    let hasher = Arc::new(CredentialHasher::new(args.hashing)?);
    let verifier = Arc::new(HttpFaceVerifier::new(&args.verifier_url)?);
    let config = GatewayConfig::new(args.frontend_base_url)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_trust_forwarded_for(args.trust_forwarded_for);

    let state = Arc::new(AppState::new(
        config,
        store,
        hasher,
        args.login_policy,
        verifier,
        args.verifier_timeout,
    ));

    let result = api::new(args.port, state).await;
    telemetry::shutdown_tracer();
    result
}

async fn open_store(dsn: &str) -> Result<Arc<dyn CredentialStore>> {
    let parsed = Url::parse(dsn).context("invalid --dsn")?;
    if parsed.scheme() == MEMORY_DSN_SCHEME {
        warn!("Using the in-memory store; all accounts are lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PgStore::connect(dsn)
        .await
        .context("Failed to connect to the credential store")?;
    Ok(Arc::new(store))
}

fn log_startup_args(args: &Args) {
    let store = Url::parse(&args.dsn).map_or_else(
        |_| "unparseable".to_string(),
        |url| format!("{}://{}", url.scheme(), url.host_str().unwrap_or("")),
    );
    info!(
        port = args.port,
        store = %store,
        frontend_base_url = %args.frontend_base_url,
        session_ttl_seconds = args.session_ttl_seconds,
        trust_forwarded_for = args.trust_forwarded_for,
        login_max_failures = args.login_policy.max_failures(),
        verifier_url = %args.verifier_url,
        verifier_timeout_seconds = args.verifier_timeout.as_secs(),
        "Starting votegate"
    );
}
