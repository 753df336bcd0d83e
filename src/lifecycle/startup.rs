//! Startup orchestration.
//!
//! # Responsibilities
//! - Build one node client per enabled ledger
//! - Wrap each client in its adapter, sharing one `KeyManager`
//! - Register the adapters by currency code
//!
//! # Design Decisions
//! - Invalid configuration is fatal; an unreachable node is not
//! - Node clients are injected into adapters, never global

use std::sync::Arc;

use crate::blockchain::account::{AccountAdapter, AlloyNode};
use crate::blockchain::registry::AdapterRegistry;
use crate::blockchain::types::{SettlementError, SettlementResult};
use crate::blockchain::utxo::{BitcoindRpc, UtxoAdapter};
use crate::config::SettlementConfig;
use crate::keys::KeyManager;

/// Registry holding an adapter for every enabled ledger.
pub async fn build_registry(
    config: &SettlementConfig,
    keys: KeyManager,
) -> SettlementResult<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();

    if config.bitcoin.enabled {
        let node = BitcoindRpc::new(&config.bitcoin)?;
        let adapter = UtxoAdapter::new(config.bitcoin.clone(), Arc::new(node), keys.clone());
        registry.register(Arc::new(adapter));
    }

    if config.ethereum.enabled {
        let node = AlloyNode::new(&config.ethereum)?;
        let adapter = AccountAdapter::new(config.ethereum.clone(), Arc::new(node), keys.clone());

        match adapter.verify_chain_id().await {
            Ok(()) => tracing::info!(chain_id = adapter.chain_id(), "Chain ID verified"),
            Err(e @ SettlementError::ChainMismatch { .. }) => {
                tracing::warn!(error = %e, "Account adapter initialized but chain verification failed")
            }
            Err(e) => tracing::warn!(error = %e, "Could not verify chain ID, node unreachable"),
        }
        registry.register(Arc::new(adapter));
    }

    if registry.is_empty() {
        return Err(SettlementError::Config("no ledger is enabled".to_string()));
    }

    tracing::info!(currencies = ?registry.supported_currencies(), "Adapter registry ready");
    Ok(registry)
}
