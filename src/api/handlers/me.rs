//! Authenticated self-service endpoints.
//!
//! Flow Overview:
//! 1) Resolve the session cookie to an active account (or tear the session down).
//! 2) Load the role record and hand out the session's anti-forgery token.
//! 3) Mutations require that token.

use axum::{
    extract::{Extension, Form},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::{clear_session_cookie, extract_session_token, presented_csrf_token, ApiReply};
use crate::api::state::AppState;
use crate::store::{Account, Role, RoleDetails};

pub(crate) const FORGED_REQUEST_MESSAGE: &str = "Invalid request. Please reload and try again.";

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct ProfileDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifesto: Option<String>,
}

impl From<RoleDetails> for ProfileDetails {
    fn from(details: RoleDetails) -> Self {
        match details {
            RoleDetails::Voter { district, voter_id } => Self {
                district: Some(district),
                voter_id,
                ..Self::default()
            },
            RoleDetails::Candidate {
                category,
                party,
                manifesto,
            } => Self {
                category: Some(category),
                party,
                manifesto,
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub id: i64,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub details: ProfileDetails,
    /// Echo as `csrf_token` or `x-csrf-token` on state-changing requests.
    pub csrf_token: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct CandidateProfileForm {
    pub csrf_token: Option<String>,
    pub party: Option<String>,
    pub manifesto: Option<String>,
}

fn unauthorized(state: &AppState) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(state.config()) {
        headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::UNAUTHORIZED,
        headers,
        Json(ApiReply::error("Please log in.")),
    )
        .into_response()
}

fn unavailable() -> Response {
    ApiReply::error("Service temporarily unavailable. Please try again later.")
        .into_response_with(StatusCode::SERVICE_UNAVAILABLE)
}

/// Resolve the session to its account, rendering the failure response otherwise.
async fn require_account(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<(String, Account), Response> {
    let Some(token) = extract_session_token(headers) else {
        return Err(unauthorized(state));
    };
    match state.authenticator().current_account(&token).await {
        Ok(Some(account)) => Ok((token, account)),
        Ok(None) => Err(unauthorized(state)),
        Err(err) => {
            error!("Failed to resolve session account: {err:#}");
            Err(unavailable())
        }
    }
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile of the logged-in account", body = MeResponse),
        (status = 401, description = "No session, or the account no longer resolves", body = ApiReply),
        (status = 503, description = "Credential store unavailable", body = ApiReply)
    ),
    tag = "me"
)]
pub async fn get_me(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let (token, account) = match require_account(&headers, &state).await {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };

    let details = match state.store().role_details(&account).await {
        Ok(details) => details.map(ProfileDetails::from).unwrap_or_default(),
        Err(err) => {
            error!("Failed to load role details: {err:#}");
            return unavailable();
        }
    };

    let csrf_token = match state.tokens().issue(&token).await {
        Ok(Some(csrf_token)) => csrf_token,
        Ok(None) => return unauthorized(&state),
        Err(err) => {
            error!("Failed to issue anti-forgery token: {err:#}");
            return unavailable();
        }
    };

    let response = MeResponse {
        id: account.id,
        full_name: account.full_name,
        username: account.username,
        email: account.email,
        role: account.role,
        created_at: account.created_at,
        last_login: account.last_login,
        details,
        csrf_token,
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[utoipa::path(
    post,
    path = "/me/candidate",
    request_body(content = CandidateProfileForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Candidate profile updated", body = ApiReply),
        (status = 401, description = "No session", body = ApiReply),
        (status = 403, description = "Missing or invalid anti-forgery token, or not a candidate", body = ApiReply),
        (status = 503, description = "Credential store unavailable", body = ApiReply)
    ),
    tag = "me"
)]
pub async fn update_candidate_profile(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    form: Option<Form<CandidateProfileForm>>,
) -> impl IntoResponse {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let (token, account) = match require_account(&headers, &state).await {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };

    let presented = presented_csrf_token(&headers, form.csrf_token.as_deref());
    if !state
        .tokens()
        .verify(Some(&token), presented.as_deref())
        .await
    {
        return ApiReply::error(FORGED_REQUEST_MESSAGE).into_response_with(StatusCode::FORBIDDEN);
    }

    if account.role != Role::Candidate {
        return ApiReply::error("Only candidates have a campaign profile.")
            .into_response_with(StatusCode::FORBIDDEN);
    }

    let party = normalize_optional(form.party);
    let manifesto = normalize_optional(form.manifesto);
    match state
        .store()
        .update_candidate_profile(account.id, party.as_deref(), manifesto.as_deref())
        .await
    {
        Ok(true) => ApiReply::success(Some("Profile updated.".to_string()), None)
            .into_response_with(StatusCode::OK),
        Ok(false) => ApiReply::error("Only candidates have a campaign profile.")
            .into_response_with(StatusCode::FORBIDDEN),
        Err(err) => {
            error!("Failed to update candidate profile: {err:#}");
            unavailable()
        }
    }
}
