//! Address issuance and key custody.

use std::sync::Arc;

use crate::blockchain::types::{LedgerAddress, SettlementError, SettlementResult};
use crate::keys::material::KeyMaterial;
use crate::keys::store::{KeyStore, MemoryKeyStore};
use crate::observability::metrics;

/// Issues addresses and owns the key bound to each of them.
///
/// Ledger-specific address derivation and key encoding are supplied by the
/// adapter as closures, so the manager stays ledger agnostic.
#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Manager backed by a process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyStore::new()))
    }

    /// Generate a key, derive its address and persist the pair.
    ///
    /// The stored key is read back and re-derived before the address is
    /// returned, so an address is never handed out without a usable key.
    pub async fn issue<F>(&self, currency: &str, derive: F) -> SettlementResult<LedgerAddress>
    where
        F: Fn(&KeyMaterial) -> SettlementResult<LedgerAddress>,
    {
        let material = KeyMaterial::generate()?;
        let address = derive(&material)
            .map_err(|e| SettlementError::KeyGeneration(format!("address derivation: {}", e)))?;

        self.store.put(currency, &address, material).await?;
        self.verify_stored(currency, &address, &derive).await?;

        metrics::record_address_issued(currency);
        tracing::info!(currency = currency, address = %address, "Address issued");
        Ok(address)
    }

    /// Take custody of an externally generated key.
    pub async fn import<F>(
        &self,
        currency: &str,
        material: KeyMaterial,
        derive: F,
    ) -> SettlementResult<LedgerAddress>
    where
        F: Fn(&KeyMaterial) -> SettlementResult<LedgerAddress>,
    {
        let address = derive(&material)?;
        self.store.put(currency, &address, material).await?;
        self.verify_stored(currency, &address, &derive).await?;

        tracing::info!(currency = currency, address = %address, "Key imported");
        Ok(address)
    }

    /// Key for signing a spend from `address`.
    pub async fn signing_key(
        &self,
        currency: &str,
        address: &LedgerAddress,
    ) -> SettlementResult<KeyMaterial> {
        self.store.get(currency, address).await?.ok_or_else(|| {
            SettlementError::SigningError(format!("no key material for address {}", address))
        })
    }

    /// The single controlled export point for key material.
    pub async fn export_key<F>(
        &self,
        currency: &str,
        address: &LedgerAddress,
        encode: F,
    ) -> SettlementResult<String>
    where
        F: FnOnce(&KeyMaterial) -> SettlementResult<String>,
    {
        let material = self.signing_key(currency, address).await?;
        tracing::warn!(currency = currency, address = %address, "Private key exported");
        encode(&material)
    }

    /// Retire an address: its key is dropped and it can never be reissued.
    pub async fn retire(&self, currency: &str, address: &LedgerAddress) -> SettlementResult<()> {
        if !self.store.retire(currency, address).await? {
            tracing::debug!(currency = currency, address = %address, "Retired address had no key");
        }
        tracing::info!(currency = currency, address = %address, "Address retired");
        Ok(())
    }

    pub async fn is_retired(&self, currency: &str, address: &LedgerAddress) -> SettlementResult<bool> {
        self.store.is_retired(currency, address).await
    }

    async fn verify_stored<F>(
        &self,
        currency: &str,
        address: &LedgerAddress,
        derive: &F,
    ) -> SettlementResult<()>
    where
        F: Fn(&KeyMaterial) -> SettlementResult<LedgerAddress>,
    {
        let stored = self.store.get(currency, address).await?.ok_or_else(|| {
            SettlementError::KeyGeneration(format!("key for {} not readable after store", address))
        })?;
        if &derive(&stored)? != address {
            return Err(SettlementError::KeyGeneration(format!(
                "stored key does not derive {}",
                address
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").finish_non_exhaustive()
    }
}
