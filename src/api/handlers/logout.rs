use axum::{
    extract::{Extension, Form},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{
    clear_session_cookie, extract_session_token, me::FORGED_REQUEST_MESSAGE,
    presented_csrf_token, ApiReply,
};
use crate::api::state::AppState;

pub const LOGOUT_REDIRECT: &str = "/login";

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct LogoutForm {
    pub csrf_token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/logout",
    request_body(content = LogoutForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Session destroyed; redirect to login"),
        (status = 403, description = "Missing or invalid anti-forgery token", body = ApiReply)
    ),
    tag = "me"
)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    form: Option<Form<LogoutForm>>,
) -> impl IntoResponse {
    let session = extract_session_token(&headers);
    let field = form.and_then(|Form(form)| form.csrf_token);
    let presented = presented_csrf_token(&headers, field.as_deref());

    if !state
        .tokens()
        .verify(session.as_deref(), presented.as_deref())
        .await
    {
        warn!("Rejected logout without a valid anti-forgery token");
        return ApiReply::error(FORGED_REQUEST_MESSAGE).into_response_with(StatusCode::FORBIDDEN);
    }

    if let Some(session) = session {
        if state.authenticator().logout(&session).await {
            info!("session destroyed");
        }
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    response_headers.insert(LOCATION, HeaderValue::from_static(LOGOUT_REDIRECT));
    (StatusCode::SEE_OTHER, response_headers).into_response()
}
