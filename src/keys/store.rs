//! Key storage boundary.
//!
//! Durable, encrypted storage lives outside this crate; the `KeyStore` trait
//! is the seam it plugs into. `MemoryKeyStore` backs tests and the CLI.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};

use crate::blockchain::types::{LedgerAddress, SettlementError, SettlementResult};
use crate::keys::material::KeyMaterial;

/// Persistent home for private keys, keyed by currency and address.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Persist a key. Fails if the address already has one or was retired.
    async fn put(
        &self,
        currency: &str,
        address: &LedgerAddress,
        material: KeyMaterial,
    ) -> SettlementResult<()>;

    async fn get(
        &self,
        currency: &str,
        address: &LedgerAddress,
    ) -> SettlementResult<Option<KeyMaterial>>;

    /// Drop the key and mark the address as permanently retired.
    /// Returns false if no key was stored.
    async fn retire(&self, currency: &str, address: &LedgerAddress) -> SettlementResult<bool>;

    async fn is_retired(&self, currency: &str, address: &LedgerAddress) -> SettlementResult<bool>;
}

fn store_key(currency: &str, address: &LedgerAddress) -> String {
    format!("{}:{}", currency.to_ascii_uppercase(), address)
}

/// Process-local key store.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: DashMap<String, KeyMaterial>,
    retired: DashSet<String>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn put(
        &self,
        currency: &str,
        address: &LedgerAddress,
        material: KeyMaterial,
    ) -> SettlementResult<()> {
        let key = store_key(currency, address);
        if self.retired.contains(&key) {
            return Err(SettlementError::KeyGeneration(format!(
                "address {} was retired",
                address
            )));
        }
        match self.keys.entry(key) {
            Entry::Occupied(_) => Err(SettlementError::KeyGeneration(format!(
                "address {} already has key material",
                address
            ))),
            Entry::Vacant(slot) => {
                slot.insert(material);
                Ok(())
            }
        }
    }

    async fn get(
        &self,
        currency: &str,
        address: &LedgerAddress,
    ) -> SettlementResult<Option<KeyMaterial>> {
        Ok(self
            .keys
            .get(&store_key(currency, address))
            .map(|entry| entry.value().clone()))
    }

    async fn retire(&self, currency: &str, address: &LedgerAddress) -> SettlementResult<bool> {
        let key = store_key(currency, address);
        let removed = self.keys.remove(&key).is_some();
        self.retired.insert(key);
        Ok(removed)
    }

    async fn is_retired(&self, currency: &str, address: &LedgerAddress) -> SettlementResult<bool> {
        Ok(self.retired.contains(&store_key(currency, address)))
    }
}
