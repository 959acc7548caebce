//! Face capture endpoints. Both forward the captured image to the verifier; neither
//! trusts biometric data directly.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension, Json},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;
use utoipa::ToSchema;

use super::{client_origin, extract_session_token, login::login_response, ApiReply};
use crate::api::state::AppState;
use crate::auth::Denial;
use crate::biometric::{Assertion, Enrollment, FaceEncoding};

const NO_FACE_MESSAGE: &str = "No face detected. Please try again.";
const NO_MATCH_MESSAGE: &str = "Face not recognized.";
const VERIFIER_UNAVAILABLE_MESSAGE: &str =
    "Face verification is temporarily unavailable. Please try again later.";

#[derive(Deserialize, ToSchema)]
pub struct FaceCapture {
    /// Captured image as a data URL.
    pub face_data: String,
}

#[derive(Serialize, ToSchema)]
pub struct EnrollmentReply {
    pub status: String,
    /// Descriptor to submit as `face_data` with the registration form.
    pub encoding: Vec<f64>,
}

#[utoipa::path(
    post,
    path = "/register/face",
    request_body = FaceCapture,
    responses(
        (status = 200, description = "Face descriptor extracted", body = EnrollmentReply),
        (status = 422, description = "No face in the capture", body = ApiReply),
        (status = 400, description = "Malformed request body", body = ApiReply),
        (status = 503, description = "Verifier unavailable", body = ApiReply)
    ),
    tag = "votegate"
)]
pub async fn enroll_face(
    state: Extension<Arc<AppState>>,
    capture: Result<Json<FaceCapture>, JsonRejection>,
) -> impl IntoResponse {
    let Json(capture) = match capture {
        Ok(capture) => capture,
        Err(rejection) => {
            debug!("Rejected face capture: {rejection}");
            return ApiReply::error("Invalid face capture request.")
                .into_response_with(StatusCode::BAD_REQUEST);
        }
    };

    match state.biometrics().enroll(&capture.face_data).await {
        Ok(Enrollment::Encoding(values)) => match FaceEncoding::try_from(values) {
            Ok(encoding) => (
                StatusCode::OK,
                Json(EnrollmentReply {
                    status: "success".to_string(),
                    encoding: encoding.values().to_vec(),
                }),
            )
                .into_response(),
            Err(_) => ApiReply::error(VERIFIER_UNAVAILABLE_MESSAGE)
                .into_response_with(StatusCode::SERVICE_UNAVAILABLE),
        },
        Ok(Enrollment::NoFace) => ApiReply::with_status("no_face", NO_FACE_MESSAGE)
            .into_response_with(StatusCode::UNPROCESSABLE_ENTITY),
        Err(_) => ApiReply::error(VERIFIER_UNAVAILABLE_MESSAGE)
            .into_response_with(StatusCode::SERVICE_UNAVAILABLE),
    }
}

#[utoipa::path(
    post,
    path = "/login/face",
    request_body = FaceCapture,
    responses(
        (status = 200, description = "Session established; cookie set", body = ApiReply),
        (status = 401, description = "No face, no match, or the match did not resolve", body = ApiReply),
        (status = 400, description = "Malformed request body", body = ApiReply),
        (status = 503, description = "Verifier or store unavailable", body = ApiReply)
    ),
    tag = "votegate"
)]
pub async fn login_face(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    capture: Result<Json<FaceCapture>, JsonRejection>,
) -> impl IntoResponse {
    let Json(capture) = match capture {
        Ok(capture) => capture,
        Err(rejection) => {
            debug!("Rejected face capture: {rejection}");
            return ApiReply::error("Invalid face capture request.")
                .into_response_with(StatusCode::BAD_REQUEST);
        }
    };

    match state.biometrics().identify(&capture.face_data).await {
        Ok(Assertion::Matched(account_id)) => {
            let origin = client_origin(
                &headers,
                peer.as_ref(),
                state.config().trust_forwarded_for(),
            );
            let previous = extract_session_token(&headers);
            let outcome = state
                .authenticator()
                .login_with_claim(account_id, &origin, previous.as_deref())
                .await;
            login_response(&state, outcome)
        }
        Ok(Assertion::NoFace) => ApiReply::with_status("no_face", NO_FACE_MESSAGE)
            .into_response_with(StatusCode::UNAUTHORIZED),
        Ok(Assertion::NoMatch) => ApiReply::with_status("no_match", NO_MATCH_MESSAGE)
            .into_response_with(StatusCode::UNAUTHORIZED),
        Err(_) => ApiReply::error(Denial::Unavailable.user_message())
            .into_response_with(StatusCode::SERVICE_UNAVAILABLE),
    }
}
