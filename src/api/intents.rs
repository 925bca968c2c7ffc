//! Intent endpoints: create and read

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::services::intent_service::{CreateIntentRequest, CreateIntentResponse, IntentProjection};

use super::{AppState, API_KEY_HEADER};

fn api_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .ok_or(ApiError::Unauthorized)
}

/// POST /v1/intents
pub async fn create_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, ApiError> {
    let key = api_key(&headers)?;
    let response = state.intent_service.create_intent(request, key).await?;
    Ok(Json(response))
}

/// GET /v1/intents/{intent_id}
pub async fn get_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(intent_id): Path<Uuid>,
) -> Result<Json<IntentProjection>, ApiError> {
    let key = api_key(&headers)?;
    let projection = state.intent_service.get_intent(intent_id, key).await?;
    Ok(Json(projection))
}
