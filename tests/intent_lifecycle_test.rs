//! End-to-end lifecycle tests over the in-memory store
//!
//! A mock chain source stands in for the explorer APIs and a local axum
//! server stands in for the merchant's webhook endpoint, so the full
//! create → match → confirm → notify → expire flow runs without touching
//! the network or a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use cryptopay::chains::{ChainSource, ProviderRegistry};
use cryptopay::config::AppConfig;
use cryptopay::models::{ChainTransaction, IntentStatus, Network, WebhookStatus};
use cryptopay::services::intent_service::CreateIntentRequest;
use cryptopay::services::webhook::{self, WebhookDispatcher, EVENT_HEADER, SIGNATURE_HEADER};
use cryptopay::services::{AmountDisambiguator, IntentService};
use cryptopay::store::{IntentStore, MemoryIntentStore, NewMerchant};
use cryptopay::workers::IntentPoller;

const ADMIN_TRC20: &str = "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE";
const WEBHOOK_SECRET: &str = "wh-s3cret";

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Scriptable chain source: tests push transfers and confirmation counts.
#[derive(Default)]
struct MockChainSource {
    transfers: Mutex<Vec<ChainTransaction>>,
    confirmations: Mutex<HashMap<String, u32>>,
}

impl MockChainSource {
    async fn push_transfer(&self, tx: ChainTransaction) {
        self.transfers.lock().await.push(tx);
    }

    async fn set_confirmations(&self, tx_hash: &str, depth: u32) {
        self.confirmations.lock().await.insert(tx_hash.to_string(), depth);
    }
}

#[async_trait]
impl ChainSource for MockChainSource {
    fn supports(&self, network: Network) -> bool {
        network == Network::Trc20
    }

    async fn fetch_incoming(&self, address: &str, since_ms: i64) -> Vec<ChainTransaction> {
        self.transfers
            .lock()
            .await
            .iter()
            .filter(|tx| tx.to_address.eq_ignore_ascii_case(address) && tx.timestamp >= since_ms)
            .cloned()
            .collect()
    }

    async fn confirmations(&self, tx_hash: &str) -> u32 {
        *self.confirmations.lock().await.get(tx_hash).unwrap_or(&0)
    }
}

/// One delivery captured by the webhook receiver.
#[derive(Clone)]
struct Delivery {
    signature: String,
    event: String,
    body: Vec<u8>,
}

struct ReceiverState {
    deliveries: Mutex<Vec<Delivery>>,
    fail: AtomicBool,
}

async fn receive_webhook(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let delivery = Delivery {
        signature: headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        event: headers
            .get(EVENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        body: body.to_vec(),
    };
    state.deliveries.lock().await.push(delivery);
    if state.fail.load(Ordering::SeqCst) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

/// Spin up a local webhook receiver; returns its URL and captured state.
async fn start_webhook_receiver() -> (String, Arc<ReceiverState>) {
    let state = Arc::new(ReceiverState {
        deliveries: Mutex::new(Vec::new()),
        fail: AtomicBool::new(false),
    });
    let app = Router::new()
        .route("/hooks", post(receive_webhook))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{addr}/hooks"), state)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryIntentStore>,
    service: IntentService,
    poller: IntentPoller,
    source: Arc<MockChainSource>,
    receiver: Arc<ReceiverState>,
    merchant_id: Uuid,
}

async fn harness_with_expiry(expiry_minutes: i64) -> Harness {
    let (webhook_url, receiver) = start_webhook_receiver().await;

    let mut config = AppConfig::default();
    config.networks.trc20.admin_address = ADMIN_TRC20.to_string();
    config.intents.expiry_minutes = expiry_minutes;
    let config = Arc::new(config);

    let store = Arc::new(MemoryIntentStore::new());
    let merchant = store
        .create_merchant(NewMerchant {
            name: "Acme".into(),
            api_key: "key-acme".into(),
            webhook_url,
            webhook_secret: WEBHOOK_SECRET.into(),
        })
        .await
        .unwrap();

    let source = Arc::new(MockChainSource::default());
    let registry = ProviderRegistry::new().register(source.clone());
    let dispatcher = Arc::new(
        WebhookDispatcher::new(store.clone(), Duration::from_secs(5)).unwrap(),
    );

    let service = IntentService::new(
        &config,
        store.clone(),
        AmountDisambiguator::with_seed(7, 25),
    );
    let poller = IntentPoller::new(store.clone(), registry, dispatcher, config);

    Harness { store, service, poller, source, receiver, merchant_id: merchant.id }
}

async fn harness() -> Harness {
    harness_with_expiry(30).await
}

fn create_request(merchant_id: Uuid, order_ref: &str) -> CreateIntentRequest {
    CreateIntentRequest {
        merchant_id,
        order_ref: order_ref.into(),
        fiat_currency: "USD".into(),
        fiat_amount: Decimal::new(100, 0),
        crypto_currency: "USDT".into(),
        network: "TRC20".into(),
        customer_email: Some("customer@example.com".into()),
        return_url: None,
    }
}

fn paying_transfer(amount: Decimal, confirmations: u32) -> ChainTransaction {
    ChainTransaction {
        tx_hash: format!("tx-{amount}"),
        from_address: "TCustomer111111111111111111111111".into(),
        to_address: ADMIN_TRC20.into(),
        amount,
        timestamp: chrono::Utc::now().timestamp_millis() + 500,
        confirmations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_payment_flow_fires_one_verifiable_webhook() {
    let h = harness().await;

    // Create: 100 USD at the default 1.0 rate lands in [100.01, 100.99]
    let created = h
        .service
        .create_intent(create_request(h.merchant_id, "order-1"), "key-acme")
        .await
        .unwrap();
    assert_eq!(created.status, IntentStatus::Pending);
    assert!(created.crypto_amount >= Decimal::new(10001, 2));
    assert!(created.crypto_amount <= Decimal::new(10099, 2));

    // A transfer of the exact disambiguated amount arrives with 1 confirmation
    h.source.push_transfer(paying_transfer(created.crypto_amount, 1)).await;
    h.poller.process_cycle().await.unwrap();

    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Paid);
    assert!(intent.tx_hash.is_some());
    assert!(intent.paid_at.is_some());
    assert_eq!(intent.last_webhook_status, WebhookStatus::Sent);

    // Exactly one delivery, signed with the merchant secret over the raw body
    let deliveries = h.receiver.deliveries.lock().await;
    assert_eq!(deliveries.len(), 1);
    let delivery = &deliveries[0];
    assert_eq!(delivery.event, "payment.paid");
    assert!(webhook::verify_signature(
        &delivery.body,
        WEBHOOK_SECRET.as_bytes(),
        &delivery.signature
    ));

    let payload: serde_json::Value = serde_json::from_slice(&delivery.body).unwrap();
    assert_eq!(payload["eventType"], "payment.paid");
    assert_eq!(payload["orderRef"], "order-1");
    assert_eq!(payload["status"], "PAID");
    assert_eq!(payload["network"], "TRC20");
}

#[tokio::test]
async fn test_repeated_cycles_do_not_renotify() {
    let h = harness().await;
    let created = h
        .service
        .create_intent(create_request(h.merchant_id, "order-1"), "key-acme")
        .await
        .unwrap();
    h.source.push_transfer(paying_transfer(created.crypto_amount, 1)).await;

    h.poller.process_cycle().await.unwrap();
    h.poller.process_cycle().await.unwrap();
    h.poller.process_cycle().await.unwrap();

    assert_eq!(h.receiver.deliveries.lock().await.len(), 1);
}

#[tokio::test]
async fn test_below_threshold_leaves_intent_pending_until_depth_reached() {
    let h = harness().await;
    let created = h
        .service
        .create_intent(create_request(h.merchant_id, "order-1"), "key-acme")
        .await
        .unwrap();

    // Transfer seen but not yet in a confirmed block
    let tx = paying_transfer(created.crypto_amount, 0);
    let tx_hash = tx.tx_hash.clone();
    h.source.push_transfer(tx).await;
    h.poller.process_cycle().await.unwrap();

    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Pending);
    assert!(h.receiver.deliveries.lock().await.is_empty());

    // Depth reaches the TRC20 threshold on a later cycle
    h.source.set_confirmations(&tx_hash, 1).await;
    h.poller.process_cycle().await.unwrap();

    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Paid);
    assert_eq!(h.receiver.deliveries.lock().await.len(), 1);
}

#[tokio::test]
async fn test_amount_mismatch_never_matches() {
    let h = harness().await;
    let created = h
        .service
        .create_intent(create_request(h.merchant_id, "order-1"), "key-acme")
        .await
        .unwrap();

    // A transfer a cent off belongs to some other intent's slot
    h.source
        .push_transfer(paying_transfer(created.crypto_amount + Decimal::new(1, 2), 1))
        .await;
    h.poller.process_cycle().await.unwrap();

    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Pending);
    assert!(h.receiver.deliveries.lock().await.is_empty());
}

#[tokio::test]
async fn test_expired_intent_is_reaped_and_never_matched() {
    let h = harness_with_expiry(0).await;
    let created = h
        .service
        .create_intent(create_request(h.merchant_id, "order-1"), "key-acme")
        .await
        .unwrap();

    // Payment arrives, but the intent is already past its window
    h.source.push_transfer(paying_transfer(created.crypto_amount, 1)).await;
    h.poller.process_cycle().await.unwrap();

    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Expired);
    assert!(h.receiver.deliveries.lock().await.is_empty());

    // Later cycles leave it terminal
    h.poller.process_cycle().await.unwrap();
    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Expired);
}

#[tokio::test]
async fn test_failed_webhook_is_retried_on_next_cycle() {
    let h = harness().await;
    let created = h
        .service
        .create_intent(create_request(h.merchant_id, "order-1"), "key-acme")
        .await
        .unwrap();
    h.source.push_transfer(paying_transfer(created.crypto_amount, 1)).await;

    // Merchant endpoint is down for the first attempt
    h.receiver.fail.store(true, Ordering::SeqCst);
    h.poller.process_cycle().await.unwrap();

    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Paid);
    assert_eq!(intent.last_webhook_status, WebhookStatus::Failed);
    assert_eq!(h.receiver.deliveries.lock().await.len(), 1);

    // Endpoint recovers; the next cycle re-dispatches exactly once
    h.receiver.fail.store(false, Ordering::SeqCst);
    h.poller.process_cycle().await.unwrap();

    let intent = h.store.intent(created.intent_id).await.unwrap();
    assert_eq!(intent.last_webhook_status, WebhookStatus::Sent);
    assert_eq!(h.receiver.deliveries.lock().await.len(), 2);

    // And never again after that
    h.poller.process_cycle().await.unwrap();
    assert_eq!(h.receiver.deliveries.lock().await.len(), 2);
}

#[tokio::test]
async fn test_two_intents_same_base_amount_settle_independently() {
    let h = harness().await;
    let first = h
        .service
        .create_intent(create_request(h.merchant_id, "order-1"), "key-acme")
        .await
        .unwrap();
    let second = h
        .service
        .create_intent(create_request(h.merchant_id, "order-2"), "key-acme")
        .await
        .unwrap();
    assert_ne!(first.crypto_amount, second.crypto_amount);

    // Only the second customer pays
    h.source.push_transfer(paying_transfer(second.crypto_amount, 1)).await;
    h.poller.process_cycle().await.unwrap();

    assert_eq!(
        h.store.intent(first.intent_id).await.unwrap().status,
        IntentStatus::Pending
    );
    assert_eq!(
        h.store.intent(second.intent_id).await.unwrap().status,
        IntentStatus::Paid
    );

    let deliveries = h.receiver.deliveries.lock().await;
    assert_eq!(deliveries.len(), 1);
    let payload: serde_json::Value = serde_json::from_slice(&deliveries[0].body).unwrap();
    assert_eq!(payload["orderRef"], "order-2");
}

#[tokio::test]
async fn test_poller_run_stops_on_shutdown_signal() {
    let h = harness().await;
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(async move { h.poller.run(rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poller did not stop promptly")
        .unwrap();
}
