//! Bounded calls into the face verifier.
//!
//! The adapter never creates sessions. A `Matched` assertion is handed to
//! [`SessionAuthenticator::login_with_claim`](crate::auth::SessionAuthenticator::login_with_claim),
//! which re-resolves the id against the store.

use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use super::verifier::{Assertion, Enrollment, FaceVerifier, VerifierError};

pub const DEFAULT_VERIFIER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct BiometricTrustAdapter {
    verifier: Arc<dyn FaceVerifier>,
    timeout: Duration,
}

impl BiometricTrustAdapter {
    #[must_use]
    pub fn new(verifier: Arc<dyn FaceVerifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }

    /// Ask the verifier who is in the picture. An empty capture is `NoFace`
    /// without a round trip.
    ///
    /// # Errors
    /// Transport, protocol and timeout failures; none of them authenticate.
    #[instrument(skip_all)]
    pub async fn identify(&self, face_data: &str) -> Result<Assertion, VerifierError> {
        if face_data.trim().is_empty() {
            return Ok(Assertion::NoFace);
        }
        let assertion = tokio::time::timeout(self.timeout, self.verifier.recognize(face_data))
            .await
            .map_err(|_| VerifierError::Timeout(self.timeout))?;
        if let Err(err) = &assertion {
            warn!("Face recognition failed: {err}");
        }
        assertion
    }

    /// Extract a descriptor for enrollment.
    ///
    /// # Errors
    /// Transport, protocol and timeout failures.
    #[instrument(skip_all)]
    pub async fn enroll(&self, face_data: &str) -> Result<Enrollment, VerifierError> {
        if face_data.trim().is_empty() {
            return Ok(Enrollment::NoFace);
        }
        let enrollment = tokio::time::timeout(self.timeout, self.verifier.extract(face_data))
            .await
            .map_err(|_| VerifierError::Timeout(self.timeout))?;
        if let Err(err) = &enrollment {
            warn!("Face extraction failed: {err}");
        }
        enrollment
    }
}
