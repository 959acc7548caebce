//! Face verifier capability and its network client.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use url::Url;

use crate::store::AccountId;

/// Verifier verdict for a captured image. `Matched` is only a claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assertion {
    NoFace,
    NoMatch,
    Matched(AccountId),
}

/// Result of descriptor extraction for enrollment.
#[derive(Clone, Debug, PartialEq)]
pub enum Enrollment {
    NoFace,
    Encoding(Vec<f64>),
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("verifier request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected verifier response: {0}")]
    Protocol(String),
    #[error("verifier did not answer within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait FaceVerifier: Send + Sync {
    /// Match the image against enrolled faces.
    async fn recognize(&self, face_data: &str) -> Result<Assertion, VerifierError>;

    /// Extract a descriptor from the image.
    async fn extract(&self, face_data: &str) -> Result<Enrollment, VerifierError>;
}

#[derive(Serialize)]
struct FaceRequest<'a> {
    face_data: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifierReply {
    status: String,
    #[serde(default)]
    user_id: Option<AccountId>,
    #[serde(default)]
    encoding: Option<Vec<f64>>,
    #[serde(default)]
    message: Option<String>,
}

impl VerifierReply {
    fn into_assertion(self) -> Result<Assertion, VerifierError> {
        match self.status.as_str() {
            "success" => self
                .user_id
                .map(Assertion::Matched)
                .ok_or_else(|| VerifierError::Protocol("success without user_id".to_string())),
            "no_face" => Ok(Assertion::NoFace),
            "no_match" | "no_registered_faces" => Ok(Assertion::NoMatch),
            other => Err(VerifierError::Protocol(self.message.unwrap_or_else(|| {
                format!("status {other}")
            }))),
        }
    }

    fn into_enrollment(self) -> Result<Enrollment, VerifierError> {
        match self.status.as_str() {
            "success" => self
                .encoding
                .map(Enrollment::Encoding)
                .ok_or_else(|| VerifierError::Protocol("success without encoding".to_string())),
            "no_face" => Ok(Enrollment::NoFace),
            other => Err(VerifierError::Protocol(self.message.unwrap_or_else(|| {
                format!("status {other}")
            }))),
        }
    }
}

/// Client for the face recognition service (`/recognize_face`, `/process_face`).
#[derive(Clone, Debug)]
pub struct HttpFaceVerifier {
    client: Client,
    recognize_url: Url,
    process_url: Url,
}

impl HttpFaceVerifier {
    /// # Errors
    /// Returns an error if `base_url` is not a valid URL or the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url).context("invalid verifier URL")?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("verifier URL cannot be a base: {base_url}"));
        }
        // `join` replaces the last segment unless the path ends with a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("failed to build verifier client")?;
        Ok(Self {
            client,
            recognize_url: base.join("recognize_face")?,
            process_url: base.join("process_face")?,
        })
    }

    async fn post(&self, url: &Url, face_data: &str) -> Result<VerifierReply, VerifierError> {
        let response = self
            .client
            .post(url.as_str())
            .json(&FaceRequest { face_data })
            .send()
            .await?;
        let status = response.status();
        debug!(%status, url = %url, "verifier responded");
        // The service reports `no_face` and friends with 200 and errors with 4xx/5xx,
        // both carrying the same JSON envelope.
        let reply: VerifierReply = response.json().await.map_err(|err| {
            VerifierError::Protocol(format!("{status}: invalid JSON body: {err}"))
        })?;
        Ok(reply)
    }
}

#[async_trait]
impl FaceVerifier for HttpFaceVerifier {
    #[instrument(skip_all)]
    async fn recognize(&self, face_data: &str) -> Result<Assertion, VerifierError> {
        self.post(&self.recognize_url, face_data)
            .await?
            .into_assertion()
    }

    #[instrument(skip_all)]
    async fn extract(&self, face_data: &str) -> Result<Enrollment, VerifierError> {
        self.post(&self.process_url, face_data)
            .await?
            .into_enrollment()
    }
}

/// Verifier that replays queued answers, for tests and offline runs.
///
/// An empty queue answers `NoFace`.
#[derive(Default)]
pub struct ScriptedVerifier {
    assertions: Mutex<VecDeque<Result<Assertion, VerifierError>>>,
    enrollments: Mutex<VecDeque<Result<Enrollment, VerifierError>>>,
    delay: Option<Duration>,
}

impl ScriptedVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn push_assertion(&self, answer: Result<Assertion, VerifierError>) {
        self.assertions.lock().await.push_back(answer);
    }

    pub async fn push_enrollment(&self, answer: Result<Enrollment, VerifierError>) {
        self.enrollments.lock().await.push_back(answer);
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl FaceVerifier for ScriptedVerifier {
    async fn recognize(&self, _face_data: &str) -> Result<Assertion, VerifierError> {
        self.pause().await;
        self.assertions
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(Assertion::NoFace))
    }

    async fn extract(&self, _face_data: &str) -> Result<Enrollment, VerifierError> {
        self.pause().await;
        self.enrollments
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(Enrollment::NoFace))
    }
}
