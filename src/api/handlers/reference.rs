use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::ApiReply;
use crate::api::state::AppState;

/// Names accepted by the registration form.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ReferenceData {
    pub districts: Vec<String>,
    pub categories: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/reference",
    responses(
        (status = 200, description = "District and candidate category names", body = ReferenceData),
        (status = 503, description = "Credential store is unreachable", body = ApiReply)
    ),
    tag = "votegate"
)]
pub async fn reference(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let store = state.store();
    let lists = match store.district_names().await {
        Ok(districts) => store
            .category_names()
            .await
            .map(|categories| (districts, categories)),
        Err(err) => Err(err),
    };
    match lists {
        Ok((districts, categories)) => (
            StatusCode::OK,
            Json(ReferenceData {
                districts,
                categories,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to load reference data: {err:#}");
            ApiReply::error("Failed to load reference data. Please try again later.")
                .into_response_with(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
