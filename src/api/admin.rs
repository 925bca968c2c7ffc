//! Admin endpoints: merchant management and a pending-payments overview.
//!
//! These sit behind the deployment's admin perimeter; they are not part of
//! the merchant API surface.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Network;
use crate::store::{IntentStore, NewMerchant};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMerchantRequest {
    pub name: String,
    pub api_key: String,
    pub webhook_url: String,
    pub webhook_secret: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantCreatedResponse {
    pub merchant_id: Uuid,
    pub name: String,
    pub api_key: String,
}

/// Merchant listing without webhook secrets.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantSummary {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingIntentSummary {
    pub id: Uuid,
    pub order_ref: String,
    pub crypto_amount: Decimal,
    pub pay_address: String,
    pub network: Network,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// POST /admin/merchants
pub async fn create_merchant(
    State(state): State<AppState>,
    Json(request): Json<CreateMerchantRequest>,
) -> Result<Json<MerchantCreatedResponse>, ApiError> {
    if request.name.trim().is_empty() || request.api_key.trim().is_empty() {
        return Err(ApiError::Validation("name and apiKey are required".into()));
    }
    let merchant = state
        .store
        .create_merchant(NewMerchant {
            name: request.name,
            api_key: request.api_key,
            webhook_url: request.webhook_url,
            webhook_secret: request.webhook_secret,
        })
        .await?;
    Ok(Json(MerchantCreatedResponse {
        merchant_id: merchant.id,
        name: merchant.name,
        api_key: merchant.api_key,
    }))
}

/// GET /admin/merchants
pub async fn list_merchants(
    State(state): State<AppState>,
) -> Result<Json<Vec<MerchantSummary>>, ApiError> {
    let merchants = state.store.list_merchants().await?;
    Ok(Json(
        merchants
            .into_iter()
            .map(|m| MerchantSummary {
                id: m.id,
                name: m.name,
                api_key: m.api_key,
                is_active: m.is_active,
            })
            .collect(),
    ))
}

/// GET /admin/intents/pending
pub async fn pending_intents(
    State(state): State<AppState>,
) -> Result<Json<Vec<PendingIntentSummary>>, ApiError> {
    let pending = state.store.pending_overview().await?;
    Ok(Json(
        pending
            .into_iter()
            .map(|i| PendingIntentSummary {
                id: i.id,
                order_ref: i.order_ref,
                crypto_amount: i.crypto_amount,
                pay_address: i.pay_address,
                network: i.network,
                expires_at: i.expires_at,
            })
            .collect(),
    ))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", timestamp: Utc::now() })
}
