//! Etherscan source for USDT ERC20 transfers
//!
//! Transfer history comes from `module=account&action=tokentx` filtered to
//! the USDT contract. Etherscan self-reports a confirmation count in that
//! feed, which the match stage uses directly; the standalone
//! `confirmations` lookup goes through the proxy endpoints
//! (`eth_getTransactionReceipt` + `eth_blockNumber`).

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::config::ChainConfig;
use crate::logging::mask_address;
use crate::models::{ChainTransaction, Network};

use super::{ChainError, ChainSource};

pub struct EtherscanSource {
    http: reqwest::Client,
    config: ChainConfig,
}

#[derive(Debug, Deserialize)]
struct EtherscanEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenTx {
    hash: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    value: String,
    time_stamp: String,
    #[serde(default)]
    token_decimal: String,
    #[serde(default)]
    confirmations: String,
}

#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    result: Option<serde_json::Value>,
}

impl EtherscanSource {
    pub fn new(config: ChainConfig, timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }

    async fn try_fetch(
        &self,
        address: &str,
        since_ms: i64,
    ) -> Result<Vec<ChainTransaction>, ChainError> {
        let mut url = format!(
            "{}?module=account&action=tokentx&address={}&contractaddress={}&sort=desc&apikey={}",
            self.config.api_url, address, self.config.usdt_contract, self.config.api_key
        );
        if since_ms > 0 {
            if let Some(start_block) = self.block_by_timestamp(since_ms / 1000).await? {
                url.push_str(&format!("&startblock={start_block}"));
            }
        }

        let envelope: EtherscanEnvelope = self.http.get(&url).send().await?.json().await?;
        if envelope.status != "1" {
            // "0" with "No transactions found" is a normal empty result
            if envelope.message.contains("No transactions") {
                return Ok(Vec::new());
            }
            return Err(ChainError::Api(format!("Etherscan: {}", envelope.message)));
        }

        let transfers: Vec<TokenTx> = serde_json::from_value(envelope.result)
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        Ok(normalize_transfers(transfers, address))
    }

    /// Map an epoch-second timestamp to the closest earlier block number.
    async fn block_by_timestamp(&self, since_secs: i64) -> Result<Option<i64>, ChainError> {
        let url = format!(
            "{}?module=block&action=getblocknobytime&timestamp={}&closest=before&apikey={}",
            self.config.api_url, since_secs, self.config.api_key
        );
        let envelope: EtherscanEnvelope = self.http.get(&url).send().await?.json().await?;
        if envelope.status != "1" {
            return Ok(None);
        }
        Ok(envelope.result.as_str().and_then(|s| s.parse().ok()))
    }

    async fn try_confirmations(&self, tx_hash: &str) -> Result<u32, ChainError> {
        let receipt_url = format!(
            "{}?module=proxy&action=eth_getTransactionReceipt&txhash={}&apikey={}",
            self.config.api_url, tx_hash, self.config.api_key
        );
        let receipt: ProxyEnvelope = self.http.get(&receipt_url).send().await?.json().await?;
        let Some(tx_block) = receipt
            .result
            .as_ref()
            .and_then(|r| r.get("blockNumber"))
            .and_then(|b| b.as_str())
            .and_then(parse_hex_quantity)
        else {
            // Pending or unknown transaction
            return Ok(0);
        };

        let head_url = format!(
            "{}?module=proxy&action=eth_blockNumber&apikey={}",
            self.config.api_url, self.config.api_key
        );
        let head: ProxyEnvelope = self.http.get(&head_url).send().await?.json().await?;
        let current = head
            .result
            .as_ref()
            .and_then(|r| r.as_str())
            .and_then(parse_hex_quantity)
            .ok_or_else(|| ChainError::Decode("eth_blockNumber result missing".into()))?;

        Ok((current - tx_block + 1).max(0) as u32)
    }
}

fn parse_hex_quantity(s: &str) -> Option<i64> {
    i64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Keep transfers addressed to us, scale raw values to human units, and
/// convert Etherscan's epoch-second timestamps to milliseconds.
fn normalize_transfers(transfers: Vec<TokenTx>, address: &str) -> Vec<ChainTransaction> {
    transfers
        .into_iter()
        .filter(|tx| tx.to.eq_ignore_ascii_case(address))
        .filter_map(|tx| {
            let decimals: u32 = tx.token_decimal.parse().unwrap_or(6);
            let raw: i128 = tx.value.parse().ok()?;
            let seconds: i64 = tx.time_stamp.parse().ok()?;
            Some(ChainTransaction {
                tx_hash: tx.hash,
                from_address: tx.from,
                to_address: tx.to,
                amount: Decimal::from_i128_with_scale(raw, decimals),
                timestamp: seconds * 1000,
                confirmations: tx.confirmations.parse().unwrap_or(0),
            })
        })
        .collect()
}

#[async_trait]
impl ChainSource for EtherscanSource {
    fn supports(&self, network: Network) -> bool {
        network == Network::Erc20
    }

    async fn fetch_incoming(&self, address: &str, since_ms: i64) -> Vec<ChainTransaction> {
        match self.try_fetch(address, since_ms).await {
            Ok(transfers) => transfers,
            Err(e) => {
                warn!(
                    address = %mask_address(address),
                    error = %e,
                    "Etherscan fetch failed, treating as no transactions this cycle"
                );
                Vec::new()
            }
        }
    }

    async fn confirmations(&self, tx_hash: &str) -> u32 {
        match self.try_confirmations(tx_hash).await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "Etherscan confirmation lookup failed");
                0
            }
        }
    }
}
