//! In-memory intent store
//!
//! Backs the deterministic test suite and local experimentation. Enforces
//! the same contract as the Postgres backend: order-ref idempotency, unique
//! Pending amounts per network, guarded status transitions, and a final
//! `sent` webhook record.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{IntentStatus, Merchant, Network, PaymentIntent, WalletAddress, WebhookStatus};

use super::{IntentStore, NewMerchant, StoreError};

#[derive(Default)]
struct Inner {
    merchants: HashMap<Uuid, Merchant>,
    intents: HashMap<Uuid, PaymentIntent>,
    addresses: Vec<WalletAddress>,
}

#[derive(Default)]
pub struct MemoryIntentStore {
    inner: RwLock<Inner>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: fetch an intent without any key gating.
    pub async fn intent(&self, intent_id: Uuid) -> Option<PaymentIntent> {
        self.inner.read().await.intents.get(&intent_id).cloned()
    }

    /// Test helper: flip a merchant's active flag.
    pub async fn set_merchant_active(&self, merchant_id: Uuid, active: bool) {
        if let Some(m) = self.inner.write().await.merchants.get_mut(&merchant_id) {
            m.is_active = active;
        }
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn create_merchant(&self, merchant: NewMerchant) -> Result<Merchant, StoreError> {
        let row = Merchant {
            id: Uuid::new_v4(),
            name: merchant.name,
            api_key: merchant.api_key,
            webhook_url: merchant.webhook_url,
            webhook_secret: merchant.webhook_secret,
            is_active: true,
            created_at: Utc::now(),
        };
        self.inner.write().await.merchants.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_merchants(&self) -> Result<Vec<Merchant>, StoreError> {
        let mut rows: Vec<Merchant> = self.inner.read().await.merchants.values().cloned().collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn active_merchant(
        &self,
        merchant_id: Uuid,
        api_key: &str,
    ) -> Result<Option<Merchant>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .merchants
            .get(&merchant_id)
            .filter(|m| m.is_active && m.api_key == api_key)
            .cloned())
    }

    async fn merchant(&self, merchant_id: Uuid) -> Result<Option<Merchant>, StoreError> {
        Ok(self.inner.read().await.merchants.get(&merchant_id).cloned())
    }

    async fn insert_intent(&self, intent: PaymentIntent) -> Result<PaymentIntent, StoreError> {
        let mut inner = self.inner.write().await;
        if inner
            .intents
            .values()
            .any(|i| i.merchant_id == intent.merchant_id && i.order_ref == intent.order_ref)
        {
            return Err(StoreError::DuplicateOrder);
        }
        if inner.intents.values().any(|i| {
            i.status == IntentStatus::Pending
                && i.network == intent.network
                && i.crypto_amount == intent.crypto_amount
        }) {
            return Err(StoreError::AmountTaken);
        }
        inner.intents.insert(intent.id, intent.clone());
        Ok(intent)
    }

    async fn intent_for_order(
        &self,
        merchant_id: Uuid,
        order_ref: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .intents
            .values()
            .find(|i| i.merchant_id == merchant_id && i.order_ref == order_ref)
            .cloned())
    }

    async fn intent_for_api_key(
        &self,
        intent_id: Uuid,
        api_key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.intents.get(&intent_id).cloned().filter(|i| {
            inner
                .merchants
                .get(&i.merchant_id)
                .is_some_and(|m| m.is_active && m.api_key == api_key)
        }))
    }

    async fn pending_amounts(&self, network: Network) -> Result<Vec<Decimal>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .intents
            .values()
            .filter(|i| i.status == IntentStatus::Pending && i.network == network)
            .map(|i| i.crypto_amount)
            .collect())
    }

    async fn pending_unexpired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let mut rows: Vec<PaymentIntent> = self
            .inner
            .read()
            .await
            .intents
            .values()
            .filter(|i| i.status == IntentStatus::Pending && i.expires_at > now)
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.created_at);
        Ok(rows)
    }

    async fn pending_overview(&self) -> Result<Vec<PaymentIntent>, StoreError> {
        let mut rows: Vec<PaymentIntent> = self
            .inner
            .read()
            .await
            .intents
            .values()
            .filter(|i| i.status == IntentStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.created_at);
        Ok(rows)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut count = 0;
        for intent in self.inner.write().await.intents.values_mut() {
            if intent.is_expired_at(now) {
                intent.status = IntentStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_paid(
        &self,
        intent_id: Uuid,
        tx_hash: &str,
        confirmations: u32,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.intents.get_mut(&intent_id) {
            Some(intent) if intent.status == IntentStatus::Pending => {
                intent.status = IntentStatus::Paid;
                intent.tx_hash = Some(tx_hash.to_string());
                intent.confirmations = Some(confirmations as i32);
                intent.paid_at = Some(paid_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_webhook_outcome(
        &self,
        intent_id: Uuid,
        status: WebhookStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(intent) = inner.intents.get_mut(&intent_id) {
            if intent.last_webhook_status != WebhookStatus::Sent {
                intent.last_webhook_status = status;
                if sent_at.is_some() {
                    intent.last_webhook_sent_at = sent_at;
                }
            }
        }
        Ok(())
    }

    async fn paid_unnotified(&self) -> Result<Vec<PaymentIntent>, StoreError> {
        let mut rows: Vec<PaymentIntent> = self
            .inner
            .read()
            .await
            .intents
            .values()
            .filter(|i| {
                i.status == IntentStatus::Paid && i.last_webhook_status != WebhookStatus::Sent
            })
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.paid_at);
        Ok(rows)
    }

    async fn add_wallet_address(
        &self,
        network: Network,
        address: &str,
    ) -> Result<WalletAddress, StoreError> {
        let row = WalletAddress {
            id: Uuid::new_v4(),
            network,
            address: address.to_string(),
            is_assigned: false,
            intent_id: None,
            created_at: Utc::now(),
        };
        self.inner.write().await.addresses.push(row.clone());
        Ok(row)
    }

    async fn allocate_wallet_address(
        &self,
        network: Network,
        intent_id: Uuid,
    ) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.write().await;
        for addr in inner.addresses.iter_mut() {
            if addr.network == network && !addr.is_assigned {
                addr.is_assigned = true;
                addr.intent_id = Some(intent_id);
                return Ok(Some(addr.address.clone()));
            }
        }
        Ok(None)
    }
}
