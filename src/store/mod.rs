//! Intent and merchant persistence
//!
//! [`IntentStore`] is the consistency contract the rest of the engine leans
//! on. Whatever the backend, it must guarantee:
//!
//! 1. `(merchant_id, order_ref)` maps to at most one intent, ever
//!    ([`StoreError::DuplicateOrder`] on violation).
//! 2. No two Pending intents on one network share a `crypto_amount`
//!    ([`StoreError::AmountTaken`] on violation).
//! 3. Status moves Pending → {Paid, Expired, Failed} only. The guarded
//!    update methods refuse anything else, so a retried cycle can never
//!    un-pay or re-expire an intent.
//! 4. `last_webhook_status = sent` is final.
//!
//! Two backends ship: [`postgres::PgIntentStore`] for deployment and
//! [`memory::MemoryIntentStore`] backing the deterministic test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Merchant, Network, PaymentIntent, WalletAddress, WebhookStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryIntentStore;
pub use postgres::PgIntentStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An intent already exists for this `(merchant_id, order_ref)`.
    #[error("an intent already exists for this order reference")]
    DuplicateOrder,

    /// Another Pending intent on the same network already carries this amount.
    #[error("crypto amount already taken on this network")]
    AmountTaken,

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.constraint() {
                Some("uq_intents_merchant_order") => return StoreError::DuplicateOrder,
                Some("uq_intents_network_amount_pending") => return StoreError::AmountTaken,
                _ => {}
            }
        }
        StoreError::Database(e.to_string())
    }
}

/// Fields required to register a merchant.
#[derive(Debug, Clone)]
pub struct NewMerchant {
    pub name: String,
    pub api_key: String,
    pub webhook_url: String,
    pub webhook_secret: String,
}

/// Durable record of payment intents and merchants.
#[async_trait]
pub trait IntentStore: Send + Sync {
    // --- merchants -------------------------------------------------------

    async fn create_merchant(&self, merchant: NewMerchant) -> Result<Merchant, StoreError>;

    async fn list_merchants(&self) -> Result<Vec<Merchant>, StoreError>;

    /// Look up an active merchant by id and API key. Inactive merchants and
    /// key mismatches both come back as `None`.
    async fn active_merchant(
        &self,
        merchant_id: Uuid,
        api_key: &str,
    ) -> Result<Option<Merchant>, StoreError>;

    async fn merchant(&self, merchant_id: Uuid) -> Result<Option<Merchant>, StoreError>;

    // --- intents ---------------------------------------------------------

    /// Atomically persist a new intent, enforcing contract points 1 and 2.
    async fn insert_intent(&self, intent: PaymentIntent) -> Result<PaymentIntent, StoreError>;

    async fn intent_for_order(
        &self,
        merchant_id: Uuid,
        order_ref: &str,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    /// Point lookup gated by the owning merchant's API key. Wrong key and
    /// unknown id are both `None` so the API cannot be used as an oracle.
    async fn intent_for_api_key(
        &self,
        intent_id: Uuid,
        api_key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    /// Amounts currently reserved by Pending intents on a network.
    async fn pending_amounts(&self, network: Network) -> Result<Vec<Decimal>, StoreError>;

    /// All Pending intents with `expires_at > now`, the match engine's input.
    async fn pending_unexpired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    /// All Pending intents regardless of expiry, for the admin overview.
    async fn pending_overview(&self) -> Result<Vec<PaymentIntent>, StoreError>;

    /// Transition every Pending intent past its expiry to Expired.
    /// Returns how many rows moved.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Guarded Pending → Paid transition. Returns `false` when the intent
    /// was not Pending (already terminal), in which case nothing changed.
    async fn mark_paid(
        &self,
        intent_id: Uuid,
        tx_hash: &str,
        confirmations: u32,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Record a webhook delivery outcome. A `sent` record is final: later
    /// calls against the same intent are ignored.
    async fn record_webhook_outcome(
        &self,
        intent_id: Uuid,
        status: WebhookStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Paid intents whose webhook has not been recorded as sent. The poller
    /// re-dispatches these each cycle.
    async fn paid_unnotified(&self) -> Result<Vec<PaymentIntent>, StoreError>;

    // --- wallet address pool (pool resolution policy only) ---------------

    async fn add_wallet_address(
        &self,
        network: Network,
        address: &str,
    ) -> Result<WalletAddress, StoreError>;

    /// Claim one unassigned pool address for an intent, or `None` when the
    /// pool for the network is dry.
    async fn allocate_wallet_address(
        &self,
        network: Network,
        intent_id: Uuid,
    ) -> Result<Option<String>, StoreError>;
}
