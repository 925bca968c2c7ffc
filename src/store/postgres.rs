//! Postgres-backed intent store
//!
//! The schema (see `migrations/0001_init.sql`) carries the contract:
//! `uq_intents_merchant_order` backs create idempotency and
//! `uq_intents_network_amount_pending` (a partial unique index over Pending
//! rows) backs amount uniqueness. State transitions are guarded updates
//! (`WHERE status = 'pending'`), so concurrent cycles race safely: exactly
//! one wins, the rest see zero rows affected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Merchant, Network, PaymentIntent, WalletAddress, WebhookStatus};

use super::{IntentStore, NewMerchant, StoreError};

const INTENT_COLUMNS: &str = "id, merchant_id, order_ref, fiat_currency, fiat_amount, \
     crypto_currency, network, customer_email, return_url, status, pay_address, \
     crypto_amount, tx_hash, confirmations, created_at, expires_at, paid_at, \
     last_webhook_status, last_webhook_sent_at";

#[derive(Clone)]
pub struct PgIntentStore {
    pool: PgPool,
}

impl PgIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn create_merchant(&self, merchant: NewMerchant) -> Result<Merchant, StoreError> {
        let row = sqlx::query_as::<_, Merchant>(
            r#"
            INSERT INTO merchants (id, name, api_key, webhook_url, webhook_secret, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6)
            RETURNING id, name, api_key, webhook_url, webhook_secret, is_active, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&merchant.name)
        .bind(&merchant.api_key)
        .bind(&merchant.webhook_url)
        .bind(&merchant.webhook_secret)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_merchants(&self) -> Result<Vec<Merchant>, StoreError> {
        let rows = sqlx::query_as::<_, Merchant>(
            "SELECT id, name, api_key, webhook_url, webhook_secret, is_active, created_at \
             FROM merchants ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn active_merchant(
        &self,
        merchant_id: Uuid,
        api_key: &str,
    ) -> Result<Option<Merchant>, StoreError> {
        let row = sqlx::query_as::<_, Merchant>(
            "SELECT id, name, api_key, webhook_url, webhook_secret, is_active, created_at \
             FROM merchants WHERE id = $1 AND api_key = $2 AND is_active",
        )
        .bind(merchant_id)
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn merchant(&self, merchant_id: Uuid) -> Result<Option<Merchant>, StoreError> {
        let row = sqlx::query_as::<_, Merchant>(
            "SELECT id, name, api_key, webhook_url, webhook_secret, is_active, created_at \
             FROM merchants WHERE id = $1",
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_intent(&self, intent: PaymentIntent) -> Result<PaymentIntent, StoreError> {
        let row = sqlx::query_as::<_, PaymentIntent>(&format!(
            r#"
            INSERT INTO payment_intents ({INTENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {INTENT_COLUMNS}
            "#
        ))
        .bind(intent.id)
        .bind(intent.merchant_id)
        .bind(&intent.order_ref)
        .bind(&intent.fiat_currency)
        .bind(intent.fiat_amount)
        .bind(&intent.crypto_currency)
        .bind(intent.network)
        .bind(&intent.customer_email)
        .bind(&intent.return_url)
        .bind(intent.status)
        .bind(&intent.pay_address)
        .bind(intent.crypto_amount)
        .bind(&intent.tx_hash)
        .bind(intent.confirmations)
        .bind(intent.created_at)
        .bind(intent.expires_at)
        .bind(intent.paid_at)
        .bind(intent.last_webhook_status)
        .bind(intent.last_webhook_sent_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn intent_for_order(
        &self,
        merchant_id: Uuid,
        order_ref: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE merchant_id = $1 AND order_ref = $2"
        ))
        .bind(merchant_id)
        .bind(order_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn intent_for_api_key(
        &self,
        intent_id: Uuid,
        api_key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query_as::<_, PaymentIntent>(
            r#"
            SELECT pi.id, pi.merchant_id, pi.order_ref, pi.fiat_currency, pi.fiat_amount,
                   pi.crypto_currency, pi.network, pi.customer_email, pi.return_url, pi.status,
                   pi.pay_address, pi.crypto_amount, pi.tx_hash, pi.confirmations, pi.created_at,
                   pi.expires_at, pi.paid_at, pi.last_webhook_status, pi.last_webhook_sent_at
            FROM payment_intents pi
            JOIN merchants m ON m.id = pi.merchant_id
            WHERE pi.id = $1 AND m.api_key = $2 AND m.is_active
            "#,
        )
        .bind(intent_id)
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn pending_amounts(&self, network: Network) -> Result<Vec<Decimal>, StoreError> {
        let rows: Vec<(Decimal,)> = sqlx::query_as(
            "SELECT crypto_amount FROM payment_intents WHERE network = $1 AND status = 'pending'",
        )
        .bind(network)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    async fn pending_unexpired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows = sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE status = 'pending' AND expires_at > $1 ORDER BY created_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn pending_overview(&self) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows = sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE status = 'pending' ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE payment_intents SET status = 'expired' \
             WHERE status = 'pending' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_paid(
        &self,
        intent_id: Uuid,
        tx_hash: &str,
        confirmations: u32,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'paid', tx_hash = $2, confirmations = $3, paid_at = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(intent_id)
        .bind(tx_hash)
        .bind(confirmations as i32)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_webhook_outcome(
        &self,
        intent_id: Uuid,
        status: WebhookStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        // A recorded 'sent' is final
        sqlx::query(
            r#"
            UPDATE payment_intents
            SET last_webhook_status = $2,
                last_webhook_sent_at = COALESCE($3, last_webhook_sent_at)
            WHERE id = $1 AND last_webhook_status <> 'sent'
            "#,
        )
        .bind(intent_id)
        .bind(status)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn paid_unnotified(&self) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows = sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE status = 'paid' AND last_webhook_status <> 'sent' ORDER BY paid_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn add_wallet_address(
        &self,
        network: Network,
        address: &str,
    ) -> Result<WalletAddress, StoreError> {
        let row = sqlx::query_as::<_, WalletAddress>(
            r#"
            INSERT INTO wallet_addresses (id, network, address, is_assigned, intent_id, created_at)
            VALUES ($1, $2, $3, FALSE, NULL, $4)
            RETURNING id, network, address, is_assigned, intent_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(network)
        .bind(address)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn allocate_wallet_address(
        &self,
        network: Network,
        intent_id: Uuid,
    ) -> Result<Option<String>, StoreError> {
        // SKIP LOCKED keeps concurrent creates from claiming the same row
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE wallet_addresses
            SET is_assigned = TRUE, intent_id = $2
            WHERE id = (
                SELECT id FROM wallet_addresses
                WHERE network = $1 AND is_assigned = FALSE
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING address
            "#,
        )
        .bind(network)
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(a,)| a))
    }
}
