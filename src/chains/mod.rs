//! Per-network chain transaction sources
//!
//! A [`ChainSource`] wraps one blockchain explorer API and answers two
//! questions: which token transfers recently arrived at an address, and how
//! deep a given transaction sits. Sources are capability-routed through the
//! [`ProviderRegistry`] rather than matched by type.
//!
//! Failure policy: a flaky explorer call must never abort a reconciliation
//! cycle. Transport and parse failures are logged inside the source and
//! surface as an empty transfer list or a confirmation count of 0; the
//! next cycle simply tries again.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ChainTransaction, Network};

pub mod ethereum;
pub mod tron;

pub use ethereum::EtherscanSource;
pub use tron::TronGridSource;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("explorer error: {0}")]
    Api(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// One explorer integration per network.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Capability predicate used by the registry to route requests.
    fn supports(&self, network: Network) -> bool;

    /// Recent incoming token transfers to `address` since `since_ms`
    /// (epoch milliseconds), normalized to human units. Empty on failure.
    async fn fetch_incoming(&self, address: &str, since_ms: i64) -> Vec<ChainTransaction>;

    /// Current confirmation depth for a transaction. 0 on failure.
    async fn confirmations(&self, tx_hash: &str) -> u32;
}

/// Registry of chain sources, resolved by capability.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    sources: Vec<Arc<dyn ChainSource>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, source: Arc<dyn ChainSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_for(&self, network: Network) -> Option<Arc<dyn ChainSource>> {
        self.sources.iter().find(|s| s.supports(network)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Network);

    #[async_trait]
    impl ChainSource for FixedSource {
        fn supports(&self, network: Network) -> bool {
            network == self.0
        }

        async fn fetch_incoming(&self, _address: &str, _since_ms: i64) -> Vec<ChainTransaction> {
            Vec::new()
        }

        async fn confirmations(&self, _tx_hash: &str) -> u32 {
            0
        }
    }

    #[test]
    fn test_registry_routes_by_capability() {
        let registry = ProviderRegistry::new()
            .register(Arc::new(FixedSource(Network::Trc20)))
            .register(Arc::new(FixedSource(Network::Erc20)));

        assert!(registry.source_for(Network::Trc20).is_some());
        assert!(registry.source_for(Network::Erc20).is_some());

        let empty = ProviderRegistry::new().register(Arc::new(FixedSource(Network::Trc20)));
        assert!(empty.source_for(Network::Erc20).is_none());
    }
}
