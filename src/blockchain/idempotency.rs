//! Idempotency ledger for outgoing transfers.
//!
//! Maps a caller-supplied idempotency key to the fully signed transaction
//! produced for it. A retry after a broadcast of unknown outcome replays the
//! recorded transaction instead of building a second one, so the ledger sees
//! at most one spend per key within the retention window.
//!
//! Entries older than the retention window are pruned whenever a new attempt
//! is recorded. Keys are scoped to the adapter.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::blockchain::types::{SettlementError, SettlementResult, TransferRequest, TxId};

/// How long a key is honoured when no retention is configured.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// A signed transaction recorded under an idempotency key.
#[derive(Debug, Clone)]
pub struct RecordedAttempt<T> {
    pub fingerprint: String,
    pub tx_id: TxId,
    pub signed: T,
    pub recorded_at: Instant,
}

/// Concurrent map of idempotency key to recorded attempt.
#[derive(Debug)]
pub struct IdempotencyLedger<T> {
    entries: Arc<DashMap<String, RecordedAttempt<T>>>,
    retention: Duration,
}

impl<T: Clone> IdempotencyLedger<T> {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            retention,
        }
    }

    fn expired(&self, attempt: &RecordedAttempt<T>, now: Instant) -> bool {
        now.duration_since(attempt.recorded_at) >= self.retention
    }

    /// Look up a prior attempt for the request's key.
    ///
    /// Returns an error if the key was used for a different transfer.
    /// Expired entries are treated as absent.
    pub fn prior_attempt(
        &self,
        request: &TransferRequest,
    ) -> SettlementResult<Option<RecordedAttempt<T>>> {
        let Some(key) = request.idempotency_key.as_deref() else {
            return Ok(None);
        };
        match self.entries.get(key) {
            Some(entry) if self.expired(entry.value(), Instant::now()) => Ok(None),
            Some(entry) if entry.fingerprint != request.fingerprint() => {
                Err(SettlementError::InvalidAmount(format!(
                    "idempotency key '{}' already used for a different transfer",
                    key
                )))
            }
            Some(entry) => Ok(Some(entry.value().clone())),
            None => Ok(None),
        }
    }

    /// Record the signed transaction before it is broadcast.
    pub fn record(&self, request: &TransferRequest, tx_id: TxId, signed: T) {
        let Some(key) = request.idempotency_key.as_deref() else {
            return;
        };
        let now = Instant::now();
        self.prune(now);
        self.entries.insert(
            key.to_string(),
            RecordedAttempt {
                fingerprint: request.fingerprint(),
                tx_id,
                signed,
                recorded_at: now,
            },
        );
    }

    fn prune(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, attempt| !self.expired(attempt, now));
        let pruned = before.saturating_sub(self.entries.len());
        if pruned > 0 {
            tracing::debug!(pruned = pruned, "Expired idempotency keys pruned");
        }
    }

    /// Drop a key whose transaction was definitively rejected.
    pub fn forget(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for IdempotencyLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_key_never_recorded() {
        let ledger: IdempotencyLedger<String> = IdempotencyLedger::new();
        let request = TransferRequest::new("a", "b", 10);
        ledger.record(&request, TxId::from("tx1"), "raw".to_string());
        assert!(ledger.is_empty());
        assert!(ledger.prior_attempt(&request).unwrap().is_none());
    }

    #[test]
    fn test_replay_returns_recorded_attempt() {
        let ledger = IdempotencyLedger::new();
        let request = TransferRequest::new("a", "b", 10).with_idempotency_key("k1");
        ledger.record(&request, TxId::from("tx1"), "raw".to_string());

        let prior = ledger.prior_attempt(&request).unwrap().unwrap();
        assert_eq!(prior.tx_id, TxId::from("tx1"));
        assert_eq!(prior.signed, "raw");
    }

    #[test]
    fn test_key_reuse_with_different_transfer() {
        let ledger = IdempotencyLedger::new();
        let first = TransferRequest::new("a", "b", 10).with_idempotency_key("k1");
        ledger.record(&first, TxId::from("tx1"), ());

        let second = TransferRequest::new("a", "b", 11).with_idempotency_key("k1");
        assert!(matches!(
            ledger.prior_attempt(&second),
            Err(SettlementError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_forget() {
        let ledger = IdempotencyLedger::new();
        let request = TransferRequest::new("a", "b", 10).with_idempotency_key("k1");
        ledger.record(&request, TxId::from("tx1"), ());
        ledger.forget("k1");
        assert!(ledger.prior_attempt(&request).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_pruned_on_record() {
        let ledger = IdempotencyLedger::with_retention(Duration::from_secs(60));
        for i in 0..50 {
            let request = TransferRequest::new("a", "b", 10).with_idempotency_key(format!("k{}", i));
            ledger.record(&request, TxId::from(format!("tx{}", i)), ());
        }
        assert_eq!(ledger.len(), 50);

        tokio::time::advance(Duration::from_secs(61)).await;
        let old = TransferRequest::new("a", "b", 10).with_idempotency_key("k0");
        assert!(ledger.prior_attempt(&old).unwrap().is_none());

        let fresh = TransferRequest::new("a", "b", 10).with_idempotency_key("k-new");
        ledger.record(&fresh, TxId::from("tx-new"), ());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_can_be_reused() {
        let ledger = IdempotencyLedger::with_retention(Duration::from_secs(60));
        let first = TransferRequest::new("a", "b", 10).with_idempotency_key("k1");
        ledger.record(&first, TxId::from("tx1"), ());

        tokio::time::advance(Duration::from_secs(61)).await;
        let second = TransferRequest::new("a", "b", 11).with_idempotency_key("k1");
        assert!(ledger.prior_attempt(&second).unwrap().is_none());
    }
}
