//! Per-sending-address exclusion.
//!
//! Input selection (UTXO) and nonce assignment (account) must not interleave
//! for the same sender. Each address gets its own async mutex; different
//! senders never contend. An address's entry is dropped from the table once
//! the last holder or waiter lets go, so the table only holds addresses with
//! a write in flight.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Table of per-address locks.
#[derive(Debug, Clone, Default)]
pub struct AddressLocks {
    inner: LockTable,
}

/// Exclusive access to one address. Releases the lock when dropped.
#[derive(Debug)]
pub struct AddressGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
    address: String,
    table: LockTable,
}

impl Drop for AddressGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Table plus this guard; anything above that is a waiter.
        self.table.remove_if(&self.address, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `address`.
    pub async fn acquire(&self, address: &str) -> AddressGuard {
        let lock = self
            .inner
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        AddressGuard {
            guard: Some(guard),
            lock,
            address: address.to_string(),
            table: self.inner.clone(),
        }
    }

    /// Number of addresses currently locked or waited on.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
