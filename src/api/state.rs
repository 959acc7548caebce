//! Shared handler state and gateway configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    AccountProvisioner, CredentialHasher, LoginPolicy, LoginRateLimiter, SessionAuthenticator,
    SessionRegistry, TokenGuard,
};
use crate::biometric::{BiometricTrustAdapter, FaceVerifier};
use crate::store::CredentialStore;

const DEFAULT_SESSION_TTL_SECONDS: u64 = 12 * 60 * 60;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    frontend_base_url: String,
    session_ttl_seconds: u64,
    trust_forwarded_for: bool,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP` instead of the peer.
    /// Only safe when every request arrives through a proxy that overwrites them.
    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Everything a handler needs, wired once at startup.
pub struct AppState {
    config: GatewayConfig,
    store: Arc<dyn CredentialStore>,
    provisioner: AccountProvisioner,
    authenticator: SessionAuthenticator,
    tokens: TokenGuard,
    biometrics: BiometricTrustAdapter,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn CredentialStore>,
        hasher: Arc<CredentialHasher>,
        policy: LoginPolicy,
        verifier: Arc<dyn FaceVerifier>,
        verifier_timeout: Duration,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(
            config.session_ttl_seconds(),
        )));
        let limiter = LoginRateLimiter::new(store.clone(), policy);
        Self {
            provisioner: AccountProvisioner::new(store.clone(), hasher.clone()),
            authenticator: SessionAuthenticator::new(
                store.clone(),
                limiter,
                hasher,
                sessions.clone(),
            ),
            tokens: TokenGuard::new(sessions),
            biometrics: BiometricTrustAdapter::new(verifier, verifier_timeout),
            config,
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub(crate) fn provisioner(&self) -> &AccountProvisioner {
        &self.provisioner
    }

    pub(crate) fn authenticator(&self) -> &SessionAuthenticator {
        &self.authenticator
    }

    pub(crate) fn tokens(&self) -> &TokenGuard {
        &self.tokens
    }

    pub(crate) fn biometrics(&self) -> &BiometricTrustAdapter {
        &self.biometrics
    }
}
