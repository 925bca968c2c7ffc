//! Pay-address resolution
//!
//! Two strategies sit behind one seam so the intent service never cares
//! which is active:
//!
//! - `fixed`: every intent on a network shares the admin address; the
//!   disambiguated amount identifies the payment.
//! - `pool`: each intent claims a pre-seeded address from the
//!   wallet_addresses pool.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{AddressPolicyKind, AppConfig};
use crate::error::ApiError;
use crate::models::Network;
use crate::store::IntentStore;

pub struct PayAddressResolver {
    policy: AddressPolicyKind,
    config: Arc<AppConfig>,
    store: Arc<dyn IntentStore>,
}

impl PayAddressResolver {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn IntentStore>) -> Self {
        Self { policy: config.intents.address_policy, config, store }
    }

    /// Resolve the address a customer will be told to pay. Fails with
    /// [`ApiError::NetworkNotConfigured`] when the network has no admin
    /// address (fixed) or the pool is dry (pool).
    pub async fn resolve(&self, network: Network, intent_id: Uuid) -> Result<String, ApiError> {
        match self.policy {
            AddressPolicyKind::Fixed => self
                .config
                .chain(network)
                .map(|chain| chain.admin_address.clone())
                .ok_or(ApiError::NetworkNotConfigured(network)),
            AddressPolicyKind::Pool => self
                .store
                .allocate_wallet_address(network, intent_id)
                .await?
                .ok_or(ApiError::NetworkNotConfigured(network)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryIntentStore;

    fn config_with(policy: AddressPolicyKind, trc20_admin: &str) -> Arc<AppConfig> {
        let mut cfg = AppConfig::default();
        cfg.intents.address_policy = policy;
        cfg.networks.trc20.admin_address = trc20_admin.to_string();
        Arc::new(cfg)
    }

    #[tokio::test]
    async fn test_fixed_policy_returns_admin_address() {
        let store = Arc::new(MemoryIntentStore::new());
        let resolver = PayAddressResolver::new(
            config_with(AddressPolicyKind::Fixed, "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE"),
            store,
        );

        let address = resolver.resolve(Network::Trc20, Uuid::new_v4()).await.unwrap();
        assert_eq!(address, "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE");

        let err = resolver.resolve(Network::Erc20, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkNotConfigured(Network::Erc20)));
    }

    #[tokio::test]
    async fn test_pool_policy_allocates_until_dry() {
        let store = Arc::new(MemoryIntentStore::new());
        store.add_wallet_address(Network::Trc20, "TPool111").await.unwrap();
        let resolver = PayAddressResolver::new(
            config_with(AddressPolicyKind::Pool, "unused"),
            store.clone(),
        );

        let address = resolver.resolve(Network::Trc20, Uuid::new_v4()).await.unwrap();
        assert_eq!(address, "TPool111");

        let err = resolver.resolve(Network::Trc20, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkNotConfigured(Network::Trc20)));
    }
}
