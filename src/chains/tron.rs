//! TronGrid source for USDT TRC20 transfers
//!
//! Transfer history comes from `GET /v1/accounts/{address}/transactions/trc20`
//! filtered to the USDT contract. The feed does not carry confirmation
//! depth, so `confirmations` derives it from the solidity block height:
//! `now_block - tx_block + 1`.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::config::ChainConfig;
use crate::logging::mask_address;
use crate::models::{ChainTransaction, Network};

use super::{ChainError, ChainSource};

pub struct TronGridSource {
    http: reqwest::Client,
    config: ChainConfig,
}

#[derive(Debug, Deserialize)]
struct Trc20TransferPage {
    #[serde(default)]
    data: Vec<Trc20Transfer>,
}

#[derive(Debug, Deserialize)]
struct Trc20Transfer {
    transaction_id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    value: String,
    block_timestamp: i64,
    token_info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default = "default_usdt_decimals")]
    decimals: u32,
}

fn default_usdt_decimals() -> u32 {
    6
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    #[serde(rename = "blockNumber")]
    block_number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NowBlock {
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: BlockRawData,
}

#[derive(Debug, Deserialize)]
struct BlockRawData {
    number: i64,
}

impl TronGridSource {
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
            "{}/v1/accounts/{}/transactions/trc20?limit=50&contract_address={}",
            self.config.api_url, address, self.config.usdt_contract
        );
        if since_ms > 0 {
            url.push_str(&format!("&min_timestamp={since_ms}"));
        }

        let mut request = self.http.get(&url);
        if !self.config.api_key.is_empty() {
            request = request.header("TRON-PRO-API-KEY", &self.config.api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ChainError::Api(format!(
                "TronGrid returned {}",
                response.status()
            )));
        }

        let page: Trc20TransferPage = response.json().await?;
        Ok(normalize_transfers(page, address))
    }

    async fn try_confirmations(&self, tx_hash: &str) -> Result<u32, ChainError> {
        let info: TransactionInfo = self
            .http
            .post(format!("{}/wallet/gettransactioninfobyid", self.config.api_url))
            .json(&json!({ "value": tx_hash }))
            .send()
            .await?
            .json()
            .await?;

        let Some(tx_block) = info.block_number else {
            // Not yet included in a block
            return Ok(0);
        };

        let now: NowBlock = self
            .http
            .post(format!("{}/wallet/getnowblock", self.config.api_url))
            .send()
            .await?
            .json()
            .await?;

        let depth = now.block_header.raw_data.number - tx_block + 1;
        Ok(depth.max(0) as u32)
    }
}

/// Keep transfers addressed to us and scale raw token values to human units.
fn normalize_transfers(page: Trc20TransferPage, address: &str) -> Vec<ChainTransaction> {
    page.data
        .into_iter()
        .filter(|tx| tx.to.eq_ignore_ascii_case(address))
        .filter_map(|tx| {
            let decimals = tx.token_info.as_ref().map(|t| t.decimals).unwrap_or(6);
            let raw: i128 = tx.value.parse().ok()?;
            Some(ChainTransaction {
                tx_hash: tx.transaction_id,
                from_address: tx.from,
                to_address: tx.to,
                amount: Decimal::from_i128_with_scale(raw, decimals),
                timestamp: tx.block_timestamp,
                confirmations: 0,
            })
        })
        .collect()
}

#[async_trait]
impl ChainSource for TronGridSource {
    fn supports(&self, network: Network) -> bool {
        network == Network::Trc20
    }

    async fn fetch_incoming(&self, address: &str, since_ms: i64) -> Vec<ChainTransaction> {
        match self.try_fetch(address, since_ms).await {
            Ok(transfers) => transfers,
            Err(e) => {
                warn!(
                    address = %mask_address(address),
                    error = %e,
                    "TronGrid fetch failed, treating as no transactions this cycle"
                );
                Vec::new()
            }
        }
    }

    async fn confirmations(&self, tx_hash: &str) -> u32 {
        match self.try_confirmations(tx_hash).await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "TronGrid confirmation lookup failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: &str = "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE";

    fn fixture() -> Trc20TransferPage {
        serde_json::from_str(&format!(
            r#"{{
                "data": [
                    {{
                        "transaction_id": "abc123",
                        "from": "TSender1111111111111111111111111111",
                        "to": "{ADMIN}",
                        "value": "100420000",
                        "block_timestamp": 1700000000000,
                        "token_info": {{ "symbol": "USDT", "decimals": 6 }}
                    }},
                    {{
                        "transaction_id": "def456",
                        "from": "{ADMIN}",
                        "to": "TSomeoneElse11111111111111111111111",
                        "value": "5000000",
                        "block_timestamp": 1700000001000,
                        "token_info": {{ "symbol": "USDT", "decimals": 6 }}
                    }}
                ],
                "success": true
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_normalize_scales_to_human_units() {
        let txs = normalize_transfers(fixture(), ADMIN);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].tx_hash, "abc123");
        assert_eq!(txs[0].amount, Decimal::new(10042, 2)); // 100420000 / 10^6
        assert_eq!(txs[0].timestamp, 1700000000000);
    }

    #[test]
    fn test_normalize_drops_outgoing_transfers() {
        let txs = normalize_transfers(fixture(), ADMIN);
        assert!(txs.iter().all(|tx| tx.to_address.eq_ignore_ascii_case(ADMIN)));
    }

    #[test]
    fn test_unparseable_value_is_skipped() {
        let page: Trc20TransferPage = serde_json::from_str(&format!(
            r#"{{"data": [{{
                "transaction_id": "bad",
                "from": "TX",
                "to": "{ADMIN}",
                "value": "not-a-number",
                "block_timestamp": 1700000000000
            }}]}}"#
        ))
        .unwrap();
        assert!(normalize_transfers(page, ADMIN).is_empty());
    }
}
