//! Form registration.

use axum::{
    extract::{rejection::FormRejection, Extension, Form},
    http::StatusCode,
    response::IntoResponse,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use super::ApiReply;
use crate::api::state::AppState;
use crate::auth::{RegistrationError, RegistrationInput};

/// Fields missing from the form are treated as empty.
#[derive(Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct RegistrationForm {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    /// `voter` or `candidate`.
    pub role: String,
    /// Required for voters.
    pub district: Option<String>,
    /// Required for candidates.
    pub category: Option<String>,
    /// JSON array of floats from `/register/face`. Required for voters.
    pub face_data: Option<String>,
}

impl From<RegistrationForm> for RegistrationInput {
    fn from(form: RegistrationForm) -> Self {
        Self {
            full_name: form.full_name,
            username: form.username,
            email: form.email,
            password: SecretString::from(form.password),
            role: form.role,
            district: form.district,
            category: form.category,
            face_data: form.face_data,
        }
    }
}

fn error_status(err: &RegistrationError) -> StatusCode {
    match err {
        RegistrationError::Conflict(_) => StatusCode::CONFLICT,
        RegistrationError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        RegistrationError::Validation(_)
        | RegistrationError::Reference(_)
        | RegistrationError::Biometric(_) => StatusCode::BAD_REQUEST,
    }
}

#[utoipa::path(
    post,
    path = "/register",
    request_body(content = RegistrationForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 201, description = "Account created", body = ApiReply),
        (status = 400, description = "Invalid input, unknown reference or missing face data", body = ApiReply),
        (status = 409, description = "Username or email already exists", body = ApiReply),
        (status = 503, description = "Registration could not be stored", body = ApiReply)
    ),
    tag = "votegate"
)]
#[instrument(skip_all)]
pub async fn register(
    state: Extension<Arc<AppState>>,
    form: Result<Form<RegistrationForm>, FormRejection>,
) -> impl IntoResponse {
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => {
            debug!("Rejected registration body: {rejection}");
            return ApiReply::error("Invalid registration request.")
                .into_response_with(StatusCode::BAD_REQUEST);
        }
    };

    match state.provisioner().register(form.into()).await {
        Ok(_) => ApiReply::success(
            Some("Registration successful! You can now log in.".to_string()),
            Some("/login"),
        )
        .into_response_with(StatusCode::CREATED),
        Err(err) => ApiReply::error(err.user_message()).into_response_with(error_status(&err)),
    }
}
