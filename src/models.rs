//! Domain entities for the payment intent lifecycle
//!
//! The central entity is [`PaymentIntent`]: a record of an expected USDT
//! payment tied to one merchant order. Intents are identified on-chain by a
//! disambiguated unique amount rather than a per-customer address, so the
//! amount doubles as the payment identifier.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Token network an intent settles on. USDT is a 6-decimal token on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "network", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Trc20,
    Erc20,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Trc20 => "TRC20",
            Network::Erc20 => "ERC20",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TRC20" => Some(Network::Trc20),
            "ERC20" => Some(Network::Erc20),
            _ => None,
        }
    }

    /// Payment URI the storefront feeds to its QR renderer.
    pub fn payment_uri(&self, address: &str, amount: Decimal) -> String {
        match self {
            Network::Trc20 => format!("tron:{address}?amount={amount}"),
            Network::Erc20 => format!("ethereum:{address}?value={amount}"),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment intent state machine. Pending is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "intent_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentStatus {
    Pending,
    Paid,
    Expired,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "PENDING",
            IntentStatus::Paid => "PAID",
            IntentStatus::Expired => "EXPIRED",
            IntentStatus::Failed => "FAILED",
        }
    }

    /// Validates a state transition. Terminal states never move again.
    pub fn can_transition_to(&self, next: IntentStatus) -> bool {
        matches!(self, IntentStatus::Pending) && next != IntentStatus::Pending
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent webhook delivery attempt for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Unset,
    Sent,
    Failed,
}

/// A merchant account. The API key authenticates intent create/read calls;
/// the webhook secret keys payment notifications.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Merchant {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub webhook_url: String,
    pub webhook_secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A record of an expected USDT payment for one merchant order.
///
/// `(merchant_id, order_ref)` is the natural idempotency key: a repeated
/// create call returns the original row unchanged. `crypto_amount` is unique
/// among Pending intents on the same network, which is what makes the shared
/// pay address workable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub order_ref: String,
    pub fiat_currency: String,
    pub fiat_amount: Decimal,
    pub crypto_currency: String,
    pub network: Network,
    pub customer_email: Option<String>,
    pub return_url: Option<String>,
    pub status: IntentStatus,
    pub pay_address: String,
    pub crypto_amount: Decimal,
    pub tx_hash: Option<String>,
    pub confirmations: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub last_webhook_status: WebhookStatus,
    pub last_webhook_sent_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == IntentStatus::Pending && self.expires_at <= now
    }

    pub fn payment_uri(&self) -> String {
        self.network.payment_uri(&self.pay_address, self.crypto_amount)
    }
}

/// A pre-seeded deposit address, used only by the pool resolution policy.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletAddress {
    pub id: Uuid,
    pub network: Network,
    pub address: String,
    pub is_assigned: bool,
    pub intent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An incoming token transfer observed on-chain. Ephemeral: produced by a
/// chain source, consumed by the match stage, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTransaction {
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    /// Token amount in human units (already scaled down by the token's decimals).
    pub amount: Decimal,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub confirmations: u32,
}
