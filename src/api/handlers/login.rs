//! Login by password (form) or by identity claim (JSON).

use axum::{
    extract::{ConnectInfo, Extension, Form, FromRequest, Json, Request},
    http::{header::CONTENT_TYPE, header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error};
use utoipa::ToSchema;

use super::{client_origin, extract_session_token, session_cookie, ApiReply};
use crate::api::state::AppState;
use crate::auth::{Denial, LoginOutcome};
use crate::store::AccountId;

pub const LOGIN_REDIRECT: &str = "/me";

#[derive(Deserialize, ToSchema)]
pub struct PasswordLogin {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Identity asserted by the face verifier on the client side.
#[derive(Deserialize, ToSchema)]
pub struct ClaimLogin {
    pub user_id: AccountId,
}

pub(crate) fn denial_status(denial: Denial) -> StatusCode {
    match denial {
        Denial::RateLimited | Denial::InvalidCredentials | Denial::UnknownIdentity => {
            StatusCode::UNAUTHORIZED
        }
        Denial::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Render a login outcome, setting the session cookie on success.
pub(crate) fn login_response(state: &AppState, outcome: LoginOutcome) -> Response {
    match outcome {
        Ok(session) => {
            let mut headers = HeaderMap::new();
            match session_cookie(state.config(), &session.token) {
                Ok(cookie) => {
                    headers.insert(SET_COOKIE, cookie);
                }
                Err(err) => {
                    error!("Failed to build session cookie: {err}");
                    return ApiReply::error(Denial::Unavailable.user_message())
                        .into_response_with(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
            (
                StatusCode::OK,
                headers,
                Json(ApiReply::success(None, Some(LOGIN_REDIRECT))),
            )
                .into_response()
        }
        Err(denial) => {
            ApiReply::error(denial.user_message()).into_response_with(denial_status(denial))
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("application/json"))
}

#[utoipa::path(
    post,
    path = "/login",
    request_body(
        description = "Form `username`/`password`, or JSON `{user_id}` after a client-side face match",
        content(
            (PasswordLogin = "application/x-www-form-urlencoded"),
            (ClaimLogin = "application/json")
        )
    ),
    responses(
        (status = 200, description = "Session established; cookie set", body = ApiReply),
        (status = 400, description = "Malformed request body", body = ApiReply),
        (status = 401, description = "Login denied", body = ApiReply),
        (status = 503, description = "Authentication backend unavailable", body = ApiReply)
    ),
    tag = "votegate"
)]
pub async fn login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    request: Request,
) -> impl IntoResponse {
    let origin = client_origin(
        &headers,
        peer.as_ref(),
        state.config().trust_forwarded_for(),
    );
    let previous = extract_session_token(&headers);

    let outcome = if is_json(&headers) {
        let Json(claim) = match Json::<ClaimLogin>::from_request(request, &()).await {
            Ok(claim) => claim,
            Err(rejection) => {
                debug!("Rejected login claim: {rejection}");
                return ApiReply::error("Invalid login request.")
                    .into_response_with(StatusCode::BAD_REQUEST);
            }
        };
        state
            .authenticator()
            .login_with_claim(claim.user_id, &origin, previous.as_deref())
            .await
    } else {
        let Form(form) = match Form::<PasswordLogin>::from_request(request, &()).await {
            Ok(form) => form,
            Err(rejection) => {
                debug!("Rejected login form: {rejection}");
                return ApiReply::error("Invalid login request.")
                    .into_response_with(StatusCode::BAD_REQUEST);
            }
        };
        let password = SecretString::from(form.password);
        state
            .authenticator()
            .login_with_password(&form.username, &password, &origin, previous.as_deref())
            .await
    };

    login_response(&state, outcome)
}
