//! Application configuration
//!
//! Layered configuration: an optional `config.{toml,yaml}` file, overridden
//! by `APP__`-prefixed environment variables (e.g.
//! `APP__POLLER__POLL_INTERVAL_SECS=15`), with `DATABASE_URL` honoured for
//! the database connection string. Every section has working defaults so a
//! bare environment still boots; networks without an admin address are
//! simply not offered to merchants.

use std::env;

use config::{Config, ConfigError, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::Network;

/// USDT contract on TRON mainnet.
pub const USDT_TRC20_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
/// USDT contract on Ethereum mainnet.
pub const USDT_ERC20_CONTRACT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/cryptopay".to_string(),
            max_connections: 10,
        }
    }
}

/// Reconciliation poller tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// How often the reconciliation cycle runs (seconds).
    pub poll_interval_secs: u64,
    /// Request timeout for explorer API calls (seconds).
    pub provider_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { poll_interval_secs: 20, provider_timeout_secs: 10 }
    }
}

/// How the pay address for a new intent is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPolicyKind {
    /// Shared admin address per network; the unique amount identifies the payment.
    Fixed,
    /// One pre-seeded address per intent, allocated from the wallet_addresses pool.
    Pool,
}

/// Intent lifecycle tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Minutes until a pending intent expires.
    pub expiry_minutes: i64,
    /// Backward skew applied to the chain query window (seconds). Absorbs
    /// clock drift between intent creation and chain timestamps.
    pub skew_window_secs: i64,
    /// Amount match tolerance. Must stay below the minimum disambiguation
    /// offset (0.01) or two intents could claim one transfer.
    pub match_tolerance: Decimal,
    /// Bounded retry count for unique-amount drawing.
    pub max_amount_retries: u32,
    pub address_policy: AddressPolicyKind,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            expiry_minutes: 30,
            skew_window_secs: 300,
            match_tolerance: Decimal::new(1, 3), // 0.001
            max_amount_retries: 25,
            address_policy: AddressPolicyKind::Fixed,
        }
    }
}

/// Per-network chain settings: the admin deposit address, the explorer API
/// to poll, and the confirmation depth required before an intent is Paid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub admin_address: String,
    pub api_url: String,
    pub api_key: String,
    pub usdt_contract: String,
    pub confirmation_threshold: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            admin_address: String::new(),
            api_url: String::new(),
            api_key: String::new(),
            usdt_contract: String::new(),
            confirmation_threshold: 1,
        }
    }
}

impl ChainConfig {
    fn default_trc20() -> Self {
        Self {
            api_url: "https://api.trongrid.io".to_string(),
            usdt_contract: USDT_TRC20_CONTRACT.to_string(),
            confirmation_threshold: 1,
            ..Self::default()
        }
    }

    fn default_erc20() -> Self {
        Self {
            api_url: "https://api.etherscan.io/api".to_string(),
            usdt_contract: USDT_ERC20_CONTRACT.to_string(),
            confirmation_threshold: 6,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworksConfig {
    pub trc20: ChainConfig,
    pub erc20: ChainConfig,
}

impl Default for NetworksConfig {
    fn default() -> Self {
        Self {
            trc20: ChainConfig::default_trc20(),
            erc20: ChainConfig::default_erc20(),
        }
    }
}

/// One entry in the static exchange-rate table.
#[derive(Debug, Clone, Deserialize)]
pub struct RatePair {
    pub fiat: String,
    pub crypto: String,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub poller: PollerConfig,
    pub intents: IntentConfig,
    pub networks: NetworksConfig,
    pub rates: Vec<RatePair>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            poller: PollerConfig::default(),
            intents: IntentConfig::default(),
            networks: NetworksConfig::default(),
            rates: vec![RatePair {
                fiat: "USD".to_string(),
                crypto: "USDT".to_string(),
                rate: Decimal::ONE,
            }],
        }
    }
}

impl AppConfig {
    /// Load configuration from `config.{toml,yaml}` (optional) and
    /// `APP__`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        if let Ok(url) = env::var("DATABASE_URL") {
            cfg.database.url = url;
        }
        Ok(cfg)
    }

    /// Chain settings for a network, or `None` when no admin address is
    /// configured (the network is then not offered to merchants).
    pub fn chain(&self, network: Network) -> Option<&ChainConfig> {
        let chain = match network {
            Network::Trc20 => &self.networks.trc20,
            Network::Erc20 => &self.networks.erc20,
        };
        if chain.admin_address.is_empty() {
            None
        } else {
            Some(chain)
        }
    }

    pub fn confirmation_threshold(&self, network: Network) -> u32 {
        match network {
            Network::Trc20 => self.networks.trc20.confirmation_threshold,
            Network::Erc20 => self.networks.erc20.confirmation_threshold,
        }
    }

    /// Static exchange-rate lookup. A missing pair is reported as `None`;
    /// callers fall back to 1.0 and log the data-quality condition.
    pub fn rate_for(&self, fiat: &str, crypto: &str) -> Option<Decimal> {
        self.rates
            .iter()
            .find(|r| r.fiat.eq_ignore_ascii_case(fiat) && r.crypto.eq_ignore_ascii_case(crypto))
            .map(|r| r.rate)
    }
}
