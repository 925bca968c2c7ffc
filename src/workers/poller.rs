//! Reconciliation poller
//!
//! The engine room of the gateway. On a fixed interval, one cycle:
//! 1. reaps Pending intents past their expiry,
//! 2. matches each remaining Pending intent against recent transfers to its
//!    pay address and, once the network's confirmation threshold is met,
//!    transitions it to Paid and dispatches the webhook,
//! 3. re-dispatches webhooks for Paid intents still not recorded as sent.
//!
//! Every state transition is a guarded single-row update, so a cycle that
//! crashes or races another instance is safe to re-run: the store refuses
//! repeat transitions and the dispatcher refuses repeat sends. One intent's
//! failure never aborts the cycle for the others.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::chains::ProviderRegistry;
use crate::config::AppConfig;
use crate::logging::mask_address;
use crate::models::{ChainTransaction, IntentStatus, PaymentIntent};
use crate::services::webhook::{NotifyOutcome, WebhookDispatcher, WebhookError};
use crate::store::{IntentStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("webhook error: {0}")]
    Webhook(#[from] WebhookError),
}

pub struct IntentPoller {
    store: Arc<dyn IntentStore>,
    registry: ProviderRegistry,
    dispatcher: Arc<WebhookDispatcher>,
    config: Arc<AppConfig>,
}

impl IntentPoller {
    pub fn new(
        store: Arc<dyn IntentStore>,
        registry: ProviderRegistry,
        dispatcher: Arc<WebhookDispatcher>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self { store, registry, dispatcher, config }
    }

    /// Main worker loop. Ticks until the shutdown channel flips.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poller.poll_interval_secs,
            "Reconciliation poller started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.poller.poll_interval_secs));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping reconciliation poller");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_cycle().await {
                        error!(error = %e, "Error in reconciliation cycle");
                    }
                }
            }
        }

        info!("Reconciliation poller stopped");
    }

    /// One full reconciliation cycle. Public so tests can drive cycles
    /// without the timer.
    pub async fn process_cycle(&self) -> Result<(), PollerError> {
        debug!("Starting reconciliation cycle");

        self.reap_expired().await?;
        self.reconcile_pending().await?;
        self.retry_unsent_webhooks().await?;

        debug!("Reconciliation cycle completed");
        Ok(())
    }

    /// Expiry reaper: Pending intents past `expires_at` become Expired.
    #[instrument(skip(self))]
    async fn reap_expired(&self) -> Result<(), PollerError> {
        let reaped = self.store.expire_due(Utc::now()).await?;
        if reaped > 0 {
            info!(count = reaped, "Expired stale payment intents");
        }
        Ok(())
    }

    /// Match engine + confirmation gate over all live Pending intents.
    #[instrument(skip(self))]
    async fn reconcile_pending(&self) -> Result<(), PollerError> {
        let pending = self.store.pending_unexpired(Utc::now()).await?;
        debug!(count = pending.len(), "Reconciling pending intents");

        for intent in pending {
            // Per-intent isolation: one flaky intent must not starve the rest
            if let Err(e) = self.process_intent(&intent).await {
                warn!(intent_id = %intent.id, error = %e, "Failed to process intent this cycle");
            }
        }
        Ok(())
    }

    async fn process_intent(&self, intent: &PaymentIntent) -> Result<(), PollerError> {
        let Some(source) = self.registry.source_for(intent.network) else {
            warn!(
                intent_id = %intent.id,
                network = %intent.network,
                "No chain source registered for network, skipping"
            );
            return Ok(());
        };

        // Small backward skew absorbs clock drift between intent creation
        // and chain timestamps
        let since_ms = (intent.created_at
            - chrono::Duration::seconds(self.config.intents.skew_window_secs))
        .timestamp_millis()
        .max(0);

        let transfers = source.fetch_incoming(&intent.pay_address, since_ms).await;
        let Some(tx) =
            matching_transaction(intent, &transfers, self.config.intents.match_tolerance)
        else {
            return Ok(());
        };

        // Confirmation gate: trust a feed-reported count, otherwise ask
        let confirmations = if tx.confirmations > 0 {
            tx.confirmations
        } else {
            source.confirmations(&tx.tx_hash).await
        };
        let threshold = self.config.confirmation_threshold(intent.network);

        if confirmations < threshold {
            info!(
                intent_id = %intent.id,
                tx_hash = %tx.tx_hash,
                confirmations,
                threshold,
                "Matched transaction below confirmation threshold, re-checking next cycle"
            );
            return Ok(());
        }

        let paid_at = Utc::now();
        if !self
            .store
            .mark_paid(intent.id, &tx.tx_hash, confirmations, paid_at)
            .await?
        {
            // Another cycle or instance won the transition
            debug!(intent_id = %intent.id, "Intent already left Pending, skipping");
            return Ok(());
        }

        info!(
            intent_id = %intent.id,
            tx_hash = %tx.tx_hash,
            confirmations,
            amount = %tx.amount,
            pay_address = %mask_address(&intent.pay_address),
            "Payment intent marked PAID"
        );

        let mut paid = intent.clone();
        paid.status = IntentStatus::Paid;
        paid.tx_hash = Some(tx.tx_hash.clone());
        paid.confirmations = Some(confirmations as i32);
        paid.paid_at = Some(paid_at);

        match self.dispatcher.notify(&paid).await? {
            NotifyOutcome::Delivered => {}
            outcome => debug!(intent_id = %intent.id, ?outcome, "Webhook not delivered this cycle"),
        }
        Ok(())
    }

    /// Cycle-cadence webhook retry: Paid intents whose webhook is not yet
    /// recorded as sent get another dispatch attempt.
    #[instrument(skip(self))]
    async fn retry_unsent_webhooks(&self) -> Result<(), PollerError> {
        let unnotified = self.store.paid_unnotified().await?;
        for intent in unnotified {
            match self.dispatcher.notify(&intent).await {
                Ok(NotifyOutcome::Delivered) => {
                    info!(intent_id = %intent.id, "Webhook retry succeeded");
                }
                Ok(_) => {}
                Err(e) => warn!(intent_id = %intent.id, error = %e, "Webhook retry errored"),
            }
        }
        Ok(())
    }
}

/// Select the transaction paying an intent: addressed to the pay address,
/// amount within tolerance, and not earlier than the intent itself.
///
/// The tolerance is strictly below the minimum disambiguation offset, so a
/// transfer can satisfy at most one Pending intent.
pub fn matching_transaction<'a>(
    intent: &PaymentIntent,
    transfers: &'a [ChainTransaction],
    tolerance: Decimal,
) -> Option<&'a ChainTransaction> {
    let created_ms = intent.created_at.timestamp_millis();
    transfers.iter().find(|tx| {
        tx.to_address.eq_ignore_ascii_case(&intent.pay_address)
            && (tx.amount - intent.crypto_amount).abs() < tolerance
            && tx.timestamp >= created_ms
    })
}
