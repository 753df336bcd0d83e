//! Currency code → adapter lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::blockchain::adapter::ChainAdapter;
use crate::blockchain::types::{SettlementError, SettlementResult};

/// The single lookup point from currency code to ledger adapter.
///
/// Codes are case-insensitive. Built once at startup, then shared
/// read-only behind an `Arc`.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its currency code.
    ///
    /// Returns the adapter it replaced, if any.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) -> Option<Arc<dyn ChainAdapter>> {
        let code = adapter.currency().to_ascii_uppercase();
        tracing::info!(currency = %code, name = adapter.name(), "Registering chain adapter");
        let previous = self.adapters.insert(code.clone(), adapter);
        if previous.is_some() {
            tracing::warn!(currency = %code, "Replaced existing chain adapter");
        }
        previous
    }

    pub fn unregister(&mut self, currency: &str) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.remove(&currency.to_ascii_uppercase())
    }

    /// Adapter for `currency`, or `UnsupportedCurrency`.
    pub fn get(&self, currency: &str) -> SettlementResult<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&currency.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| SettlementError::UnsupportedCurrency(currency.to_string()))
    }

    /// Registered currency codes, sorted.
    pub fn supported_currencies(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.adapters.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn ChainAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("currencies", &self.supported_currencies())
            .finish()
    }
}
