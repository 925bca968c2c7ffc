//! Service entrypoint: configuration, database, chain sources, the
//! reconciliation poller, and the HTTP server, with graceful shutdown
//! threaded through a watch channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;

use cryptopay::api::{self, AppState};
use cryptopay::chains::{EtherscanSource, ProviderRegistry, TronGridSource};
use cryptopay::config::AppConfig;
use cryptopay::logging;
use cryptopay::models::Network;
use cryptopay::services::{AmountDisambiguator, IntentService, WebhookDispatcher};
use cryptopay::store::{IntentStore, PgIntentStore};
use cryptopay::workers::IntentPoller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_tracing();

    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);
    info!(
        poll_interval_secs = config.poller.poll_interval_secs,
        expiry_minutes = config.intents.expiry_minutes,
        "Starting CryptoPay backend"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let store: Arc<dyn IntentStore> = Arc::new(PgIntentStore::new(pool));
    let provider_timeout = Duration::from_secs(config.poller.provider_timeout_secs);

    let mut registry = ProviderRegistry::new();
    if let Some(chain) = config.chain(Network::Trc20) {
        registry = registry.register(Arc::new(TronGridSource::new(
            chain.clone(),
            provider_timeout,
        )?));
        info!(admin = %logging::mask_address(&chain.admin_address), "TRC20 source registered");
    }
    if let Some(chain) = config.chain(Network::Erc20) {
        registry = registry.register(Arc::new(EtherscanSource::new(
            chain.clone(),
            provider_timeout,
        )?));
        info!(admin = %logging::mask_address(&chain.admin_address), "ERC20 source registered");
    }

    let dispatcher = Arc::new(WebhookDispatcher::new(store.clone(), provider_timeout)?);
    let disambiguator = AmountDisambiguator::new(config.intents.max_amount_retries);
    let intent_service = Arc::new(IntentService::new(&config, store.clone(), disambiguator));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = IntentPoller::new(store.clone(), registry, dispatcher, config.clone());
    let poller_handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

    let state = AppState { intent_service, store };
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Stop the poller after the HTTP server drains
    shutdown_tx.send(true).ok();
    poller_handle.await.ok();
    info!("CryptoPay backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received");
}
