//! Webhook dispatch
//!
//! Builds the `payment.paid` notification for a Paid intent, signs the raw
//! JSON body with HMAC-SHA256 keyed by the merchant's webhook secret, and
//! posts it to the merchant's webhook URL. The dispatch guard makes this
//! idempotent: once an intent's webhook is recorded as sent, `notify` is a
//! no-op forever. Failures are recorded on the intent and picked up by the
//! next reconciliation cycle; there is no in-component retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::models::{IntentStatus, Network, PaymentIntent, WebhookStatus};
use crate::store::{IntentStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-CryptoPay-Signature";
pub const EVENT_HEADER: &str = "X-CryptoPay-Event";
pub const EVENT_PAYMENT_PAID: &str = "payment.paid";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("payload serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What `notify` actually did, for the caller's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Delivered now and recorded as sent.
    Delivered,
    /// Already recorded as sent earlier; nothing dispatched.
    AlreadySent,
    /// Not eligible (not Paid, or merchant has no webhook URL).
    Skipped,
    /// Attempted and failed; recorded as failed for the next cycle.
    Failed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentPaidPayload<'a> {
    event_type: &'a str,
    intent_id: uuid::Uuid,
    order_ref: &'a str,
    status: &'a str,
    crypto_amount: Decimal,
    crypto_currency: &'a str,
    network: Network,
    tx_hash: Option<&'a str>,
    confirmations: Option<i32>,
    paid_at: Option<DateTime<Utc>>,
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
    store: Arc<dyn IntentStore>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn IntentStore>, timeout: Duration) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, store })
    }

    /// Deliver the `payment.paid` notification for an intent, at most once.
    pub async fn notify(&self, intent: &PaymentIntent) -> Result<NotifyOutcome, WebhookError> {
        if intent.status != IntentStatus::Paid {
            return Ok(NotifyOutcome::Skipped);
        }
        // Idempotent dispatch guard
        if intent.last_webhook_status == WebhookStatus::Sent {
            return Ok(NotifyOutcome::AlreadySent);
        }

        let Some(merchant) = self.store.merchant(intent.merchant_id).await? else {
            warn!(intent_id = %intent.id, "Intent references an unknown merchant, skipping webhook");
            return Ok(NotifyOutcome::Skipped);
        };
        if merchant.webhook_url.is_empty() {
            warn!(
                intent_id = %intent.id,
                merchant_id = %merchant.id,
                "Merchant has no webhook URL configured"
            );
            return Ok(NotifyOutcome::Skipped);
        }

        let payload = PaymentPaidPayload {
            event_type: EVENT_PAYMENT_PAID,
            intent_id: intent.id,
            order_ref: &intent.order_ref,
            status: "PAID",
            crypto_amount: intent.crypto_amount,
            crypto_currency: &intent.crypto_currency,
            network: intent.network,
            tx_hash: intent.tx_hash.as_deref(),
            confirmations: intent.confirmations,
            paid_at: intent.paid_at,
        };
        // Sign the exact bytes that go over the wire
        let body = serde_json::to_vec(&payload)?;
        let signature = sign(&body, merchant.webhook_secret.as_bytes());

        let result = self
            .http
            .post(&merchant.webhook_url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, &signature)
            .header(EVENT_HEADER, EVENT_PAYMENT_PAID)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.store
                    .record_webhook_outcome(intent.id, WebhookStatus::Sent, Some(Utc::now()))
                    .await?;
                info!(intent_id = %intent.id, "Webhook delivered");
                Ok(NotifyOutcome::Delivered)
            }
            Ok(response) => {
                self.store
                    .record_webhook_outcome(intent.id, WebhookStatus::Failed, None)
                    .await?;
                warn!(
                    intent_id = %intent.id,
                    status = %response.status(),
                    "Webhook rejected by merchant endpoint"
                );
                Ok(NotifyOutcome::Failed)
            }
            Err(e) => {
                self.store
                    .record_webhook_outcome(intent.id, WebhookStatus::Failed, None)
                    .await?;
                warn!(intent_id = %intent.id, error = %e, "Webhook delivery failed");
                Ok(NotifyOutcome::Failed)
            }
        }
    }
}

/// Lower-case hex HMAC-SHA256 of `body` keyed by the merchant secret.
pub fn sign(body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time signature check, the verification merchants should run.
pub fn verify_signature(body: &[u8], secret: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
