//! Payment intent creation and lookup
//!
//! Creation is idempotent on `(merchant_id, order_ref)`: a replayed request
//! returns the original intent unchanged, with no re-disambiguation and no
//! new address allocation. Reads are gated by the owning merchant's API key
//! and never reveal whether an id exists under someone else's key.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::{IntentStatus, Network, PaymentIntent, WebhookStatus};
use crate::store::{IntentStore, StoreError};

use super::amount::AmountDisambiguator;
use super::exchange_rate::ExchangeRateService;
use super::pay_address::PayAddressResolver;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub merchant_id: Uuid,
    pub order_ref: String,
    pub fiat_currency: String,
    pub fiat_amount: Decimal,
    pub crypto_currency: String,
    pub network: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub intent_id: Uuid,
    pub status: IntentStatus,
    pub pay_address: String,
    pub crypto_amount: Decimal,
    /// Network-specific payment URI the storefront feeds to its QR renderer.
    pub payment_uri: String,
    pub expires_at: DateTime<Utc>,
}

/// Public projection of an intent, as returned to the merchant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentProjection {
    pub intent_id: Uuid,
    pub status: IntentStatus,
    pub pay_address: String,
    pub crypto_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<i32>,
    pub expires_at: DateTime<Utc>,
}

impl From<PaymentIntent> for IntentProjection {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            intent_id: intent.id,
            status: intent.status,
            pay_address: intent.pay_address,
            crypto_amount: intent.crypto_amount,
            tx_hash: intent.tx_hash,
            confirmations: intent.confirmations,
            expires_at: intent.expires_at,
        }
    }
}

pub struct IntentService {
    store: Arc<dyn IntentStore>,
    resolver: PayAddressResolver,
    rates: ExchangeRateService,
    disambiguator: AmountDisambiguator,
    expiry: Duration,
}

impl IntentService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn IntentStore>,
        disambiguator: AmountDisambiguator,
    ) -> Self {
        let resolver = PayAddressResolver::new(Arc::new(config.clone()), store.clone());
        Self {
            store,
            resolver,
            rates: ExchangeRateService::new(config.rates.clone()),
            disambiguator,
            expiry: Duration::minutes(config.intents.expiry_minutes),
        }
    }

    pub async fn create_intent(
        &self,
        request: CreateIntentRequest,
        api_key: &str,
    ) -> Result<CreateIntentResponse, ApiError> {
        // 1. Validation
        let network = Network::parse(&request.network)
            .ok_or_else(|| ApiError::Validation(format!("unknown network {}", request.network)))?;
        if request.fiat_amount <= Decimal::ZERO {
            return Err(ApiError::Validation("fiat amount must be positive".into()));
        }
        if !request.crypto_currency.eq_ignore_ascii_case("USDT") {
            return Err(ApiError::Validation("only USDT is supported".into()));
        }
        if request.order_ref.trim().is_empty() {
            return Err(ApiError::Validation("order reference is required".into()));
        }

        // 2. Merchant authentication
        let merchant = self
            .store
            .active_merchant(request.merchant_id, api_key)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        // 3. Idempotent replay on (merchant, order_ref)
        if let Some(existing) = self
            .store
            .intent_for_order(merchant.id, &request.order_ref)
            .await?
        {
            info!(
                intent_id = %existing.id,
                order_ref = %existing.order_ref,
                "Returning existing intent for replayed create"
            );
            return Ok(Self::to_create_response(existing));
        }

        // 4. Pay address via the active resolution policy
        let intent_id = Uuid::new_v4();
        let pay_address = self.resolver.resolve(network, intent_id).await?;

        // 5. Fiat → crypto conversion, then amount disambiguation
        let base_amount = self.rates.base_crypto_amount(
            request.fiat_amount,
            &request.fiat_currency,
            &request.crypto_currency,
        );
        let taken = self.store.pending_amounts(network).await?;
        let crypto_amount = self
            .disambiguator
            .unique_amount(base_amount, &taken)
            .map_err(|e| {
                warn!(network = %network, error = %e, "Amount disambiguation exhausted");
                ApiError::AmountSpaceExhausted
            })?;

        // 6. Persist atomically as Pending
        let now = Utc::now();
        let intent = PaymentIntent {
            id: intent_id,
            merchant_id: merchant.id,
            order_ref: request.order_ref.clone(),
            fiat_currency: request.fiat_currency.to_uppercase(),
            fiat_amount: request.fiat_amount,
            crypto_currency: "USDT".to_string(),
            network,
            customer_email: request.customer_email,
            return_url: request.return_url,
            status: IntentStatus::Pending,
            pay_address,
            crypto_amount,
            tx_hash: None,
            confirmations: None,
            created_at: now,
            expires_at: now + self.expiry,
            paid_at: None,
            last_webhook_status: WebhookStatus::Unset,
            last_webhook_sent_at: None,
        };

        let intent = match self.store.insert_intent(intent).await {
            Ok(intent) => intent,
            // Lost a create race on the order ref: replay the winner
            Err(StoreError::DuplicateOrder) => self
                .store
                .intent_for_order(merchant.id, &request.order_ref)
                .await?
                .ok_or(ApiError::Conflict)?,
            // Lost the amount slot between snapshot and insert
            Err(StoreError::AmountTaken) => return Err(ApiError::AmountSpaceExhausted),
            Err(e) => return Err(e.into()),
        };

        info!(
            intent_id = %intent.id,
            merchant_id = %intent.merchant_id,
            network = %intent.network,
            crypto_amount = %intent.crypto_amount,
            expires_at = %intent.expires_at,
            "Created payment intent"
        );

        Ok(Self::to_create_response(intent))
    }

    pub async fn get_intent(
        &self,
        intent_id: Uuid,
        api_key: &str,
    ) -> Result<IntentProjection, ApiError> {
        self.store
            .intent_for_api_key(intent_id, api_key)
            .await?
            .map(IntentProjection::from)
            .ok_or(ApiError::NotFound)
    }

    fn to_create_response(intent: PaymentIntent) -> CreateIntentResponse {
        let payment_uri = intent.payment_uri();
        CreateIntentResponse {
            intent_id: intent.id,
            status: intent.status,
            pay_address: intent.pay_address,
            crypto_amount: intent.crypto_amount,
            payment_uri,
            expires_at: intent.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryIntentStore, NewMerchant};

    const ADMIN_TRC20: &str = "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE";

    async fn setup() -> (IntentService, Arc<MemoryIntentStore>, crate::models::Merchant) {
        let mut config = AppConfig::default();
        config.networks.trc20.admin_address = ADMIN_TRC20.to_string();

        let store = Arc::new(MemoryIntentStore::new());
        let merchant = store
            .create_merchant(NewMerchant {
                name: "Acme".into(),
                api_key: "key-acme".into(),
                webhook_url: "https://acme.example/hooks".into(),
                webhook_secret: "s3cret".into(),
            })
            .await
            .unwrap();

        let service = IntentService::new(
            &config,
            store.clone(),
            AmountDisambiguator::with_seed(7, 25),
        );
        (service, store, merchant)
    }

    fn request(merchant_id: Uuid, order_ref: &str) -> CreateIntentRequest {
        CreateIntentRequest {
            merchant_id,
            order_ref: order_ref.into(),
            fiat_currency: "USD".into(),
            fiat_amount: Decimal::new(100, 0),
            crypto_currency: "USDT".into(),
            network: "TRC20".into(),
            customer_email: None,
            return_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_disambiguates_into_cent_range() {
        let (service, _, merchant) = setup().await;
        let response = service
            .create_intent(request(merchant.id, "order-1"), "key-acme")
            .await
            .unwrap();

        assert_eq!(response.status, IntentStatus::Pending);
        assert_eq!(response.pay_address, ADMIN_TRC20);
        assert!(response.crypto_amount >= Decimal::new(10001, 2));
        assert!(response.crypto_amount <= Decimal::new(10099, 2));
        assert!(response.payment_uri.starts_with("tron:"));
    }

    #[tokio::test]
    async fn test_create_is_idempotent_on_order_ref() {
        let (service, _, merchant) = setup().await;
        let first = service
            .create_intent(request(merchant.id, "order-1"), "key-acme")
            .await
            .unwrap();
        let second = service
            .create_intent(request(merchant.id, "order-1"), "key-acme")
            .await
            .unwrap();

        assert_eq!(first.intent_id, second.intent_id);
        assert_eq!(first.pay_address, second.pay_address);
        assert_eq!(first.crypto_amount, second.crypto_amount);
    }

    #[tokio::test]
    async fn test_concurrent_style_creates_get_distinct_amounts() {
        let (service, _, merchant) = setup().await;
        let mut amounts = Vec::new();
        for i in 0..10 {
            let response = service
                .create_intent(request(merchant.id, &format!("order-{i}")), "key-acme")
                .await
                .unwrap();
            amounts.push(response.crypto_amount);
        }
        let mut deduped = amounts.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), amounts.len(), "amounts must be pairwise distinct");
    }

    #[tokio::test]
    async fn test_wrong_key_and_inactive_merchant_are_unauthorized() {
        let (service, store, merchant) = setup().await;
        let err = service
            .create_intent(request(merchant.id, "order-1"), "wrong-key")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));

        store.set_merchant_active(merchant.id, false).await;
        let err = service
            .create_intent(request(merchant.id, "order-2"), "key-acme")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_unconfigured_network_is_rejected() {
        let (service, _, merchant) = setup().await;
        let mut req = request(merchant.id, "order-1");
        req.network = "ERC20".into();
        let err = service.create_intent(req, "key-acme").await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkNotConfigured(Network::Erc20)));
    }

    #[tokio::test]
    async fn test_get_intent_does_not_leak_existence() {
        let (service, _, merchant) = setup().await;
        let created = service
            .create_intent(request(merchant.id, "order-1"), "key-acme")
            .await
            .unwrap();

        // Wrong key reads as not-found, same as a random id
        let err = service
            .get_intent(created.intent_id, "other-key")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
        let err = service.get_intent(Uuid::new_v4(), "key-acme").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));

        let projection = service
            .get_intent(created.intent_id, "key-acme")
            .await
            .unwrap();
        assert_eq!(projection.intent_id, created.intent_id);
        assert_eq!(projection.status, IntentStatus::Pending);
    }
}
