//! CryptoPay backend
//!
//! A payment gateway that lets merchants accept USDT (TRC20/ERC20) against a
//! shared admin-controlled address per network. Individual payments are told
//! apart by a disambiguated unique amount, confirmed by polling blockchain
//! explorer APIs, and reported to the merchant exactly once through an
//! HMAC-signed webhook.
//!
//! The crate is organised as:
//! - [`store`]: durable record of merchants and payment intents
//! - [`chains`]: per-network transaction sources (TronGrid, Etherscan)
//! - [`services`]: intent lifecycle, amount disambiguation, webhook dispatch
//! - [`workers`]: the periodic reconciliation poller
//! - [`api`]: the merchant-facing HTTP surface

pub mod api;
pub mod chains;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod workers;

pub use config::AppConfig;
pub use error::ApiError;
