#![allow(dead_code)]

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use votegate::{
    api::{AppState, GatewayConfig},
    auth::{
        AccountProvisioner, CredentialHasher, HashingParams, LoginPolicy, LoginRateLimiter,
        RegistrationInput, SessionAuthenticator, SessionRegistry,
    },
    biometric::ScriptedVerifier,
    store::MemoryStore,
};

pub const PASSWORD: &str = "secret1";

/// Cheap parameters; production defaults make every test take seconds.
pub fn fast_hasher() -> Result<Arc<CredentialHasher>> {
    Ok(Arc::new(CredentialHasher::new(HashingParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })?))
}

pub fn face_data() -> String {
    let values: Vec<f64> = (0..128_u32).map(|i| f64::from(i) / 256.0 + 0.12).collect();
    serde_json::to_string(&values).unwrap_or_default()
}

pub fn voter(username: &str, email: &str) -> RegistrationInput {
    RegistrationInput {
        full_name: "Abebe Kebede".to_string(),
        username: username.to_string(),
        email: email.to_string(),
        password: SecretString::from(PASSWORD.to_string()),
        role: "voter".to_string(),
        district: Some("Bole".to_string()),
        category: None,
        face_data: Some(face_data()),
    }
}

pub fn candidate(username: &str, email: &str) -> RegistrationInput {
    RegistrationInput {
        full_name: "Almaz Tesfaye".to_string(),
        username: username.to_string(),
        email: email.to_string(),
        password: SecretString::from(PASSWORD.to_string()),
        role: "candidate".to_string(),
        district: None,
        category: Some("Regional".to_string()),
        face_data: None,
    }
}

pub fn provisioner(store: &MemoryStore) -> Result<AccountProvisioner> {
    Ok(AccountProvisioner::new(Arc::new(store.clone()), fast_hasher()?))
}

pub fn authenticator(store: &MemoryStore, policy: LoginPolicy) -> Result<SessionAuthenticator> {
    let shared: Arc<MemoryStore> = Arc::new(store.clone());
    Ok(SessionAuthenticator::new(
        shared.clone(),
        LoginRateLimiter::new(shared, policy),
        fast_hasher()?,
        Arc::new(SessionRegistry::new(Duration::from_secs(3600))),
    ))
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig::new("http://localhost:3000".to_string())
}

pub fn app_state(store: &MemoryStore, verifier: Arc<ScriptedVerifier>) -> Result<Arc<AppState>> {
    app_state_with(store, verifier, gateway_config(), Duration::from_secs(2))
}

pub fn app_state_with(
    store: &MemoryStore,
    verifier: Arc<ScriptedVerifier>,
    config: GatewayConfig,
    verifier_timeout: Duration,
) -> Result<Arc<AppState>> {
    Ok(Arc::new(AppState::new(
        config,
        Arc::new(store.clone()),
        fast_hasher()?,
        LoginPolicy::default(),
        verifier,
        verifier_timeout,
    )))
}
