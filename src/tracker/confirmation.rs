//! Confirmation tracking over the adapter registry.
//!
//! Two kinds of entries share one monitor loop: outgoing transactions
//! waiting for finality, and receiving addresses watched for incoming value.

use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::blockchain::registry::AdapterRegistry;
use crate::blockchain::types::{LedgerAddress, SettlementError, SettlementResult, TxId};
use crate::config::TrackerConfig;
use crate::observability::metrics;
use crate::resilience::Backoff;
use crate::tracker::state::{Observation, TrackState, TrackedEntry, TrackedStatus};
use crate::tracker::watch::{AddressStatus, WatchedAddress};

fn entry_key(currency: &str, tx_id: &TxId) -> String {
    format!("{}:{}", currency.to_ascii_uppercase(), tx_id)
}

fn address_key(currency: &str, address: &LedgerAddress) -> String {
    format!("{}:{}", currency.to_ascii_uppercase(), address)
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Tracks broadcast transactions until they are final, and watched
/// addresses for incoming payments.
///
/// Reads only: never takes a sending-address lock.
pub struct ConfirmationTracker {
    registry: Arc<AdapterRegistry>,
    config: TrackerConfig,
    entries: DashMap<String, TrackedEntry>,
    addresses: DashMap<String, WatchedAddress>,
}

impl ConfirmationTracker {
    pub fn new(registry: Arc<AdapterRegistry>, config: TrackerConfig) -> Self {
        Self {
            registry,
            config,
            entries: DashMap::new(),
            addresses: DashMap::new(),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.config.inclusion_timeout_secs)
    }

    /// Start tracking `tx_id`. Watching an id twice is a no-op.
    pub fn watch(&self, currency: &str, tx_id: &TxId) -> SettlementResult<TrackedStatus> {
        let adapter = self.registry.get(currency)?;
        let status = self
            .entries
            .entry(entry_key(currency, tx_id))
            .or_insert_with(|| {
                tracing::debug!(currency = currency, tx_id = %tx_id, "Tracking transaction");
                TrackedEntry::new(
                    adapter.currency(),
                    tx_id.clone(),
                    adapter.finality_threshold(),
                    Instant::now(),
                )
            })
            .snapshot();
        metrics::set_tracked_transactions(self.entries.len());
        Ok(status)
    }

    /// Last known status, without touching the network.
    pub fn status(&self, currency: &str, tx_id: &TxId) -> Option<TrackedStatus> {
        self.entries
            .get(&entry_key(currency, tx_id))
            .map(|e| e.snapshot())
    }

    /// Query the node once and advance the state machine.
    ///
    /// Terminal entries are answered from memory.
    pub async fn poll(&self, currency: &str, tx_id: &TxId) -> SettlementResult<TrackedStatus> {
        let current = self.watch(currency, tx_id)?;
        if current.state.is_terminal() {
            return Ok(current);
        }

        let adapter = self.registry.get(currency)?;
        let observation = match adapter.get_transaction(tx_id).await {
            Ok(tx) => Observation::from(&tx),
            Err(SettlementError::TransactionNotFound(_)) => Observation::NotFound,
            Err(e) => return Err(e),
        };

        let key = entry_key(currency, tx_id);
        let mut entry = self.entries.get_mut(&key).ok_or_else(|| {
            SettlementError::Cancelled(format!("tracking of {} was cancelled", tx_id))
        })?;
        if let Some(next) = entry.apply(observation, Instant::now(), self.inclusion_timeout()) {
            metrics::record_tracker_transition(next.as_str());
            tracing::info!(
                currency = %entry.currency,
                tx_id = %tx_id,
                state = %next,
                confirmations = entry.confirmations,
                "Transaction state changed"
            );
        }
        Ok(entry.snapshot())
    }

    /// Wait until `tx_id` is confirmed or failed.
    ///
    /// Returns `ConfirmationTimeout` if `timeout` passes or the transaction
    /// is never included, and `Cancelled` if `cancel` fires (the entry is
    /// then removed). `Failed` is a successful return with that state.
    pub async fn wait(
        &self,
        currency: &str,
        tx_id: &TxId,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> SettlementResult<TrackedStatus> {
        self.watch(currency, tx_id)?;
        let started = Instant::now();
        let deadline = started + timeout;
        let mut backoff = Backoff::new(self.config.backoff_base_ms, self.config.backoff_max_ms);

        loop {
            let delay = match self.poll(currency, tx_id).await {
                Ok(status) => match status.state {
                    TrackState::Confirmed | TrackState::Failed => return Ok(status),
                    TrackState::TimedOut => {
                        return Err(SettlementError::ConfirmationTimeout {
                            tx_id: tx_id.to_string(),
                            waited_secs: self.config.inclusion_timeout_secs,
                        })
                    }
                    TrackState::Pending => {
                        backoff.reset();
                        self.poll_interval()
                    }
                },
                Err(SettlementError::NetworkUnavailable(reason)) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        tx_id = %tx_id,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Node unavailable while tracking, backing off"
                    );
                    delay
                }
                Err(e) => return Err(e),
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(SettlementError::ConfirmationTimeout {
                    tx_id: tx_id.to_string(),
                    waited_secs: now.duration_since(started).as_secs(),
                });
            }

            tokio::select! {
                _ = sleep(delay.min(deadline - now)) => {}
                _ = cancelled(cancel) => {
                    self.cancel(currency, tx_id);
                    return Err(SettlementError::Cancelled(format!("wait for {}", tx_id)));
                }
            }
        }
    }

    /// Stop tracking `tx_id`. The transaction itself is unaffected.
    pub fn cancel(&self, currency: &str, tx_id: &TxId) -> bool {
        let removed = self.entries.remove(&entry_key(currency, tx_id)).is_some();
        if removed {
            tracing::debug!(currency = currency, tx_id = %tx_id, "Stopped tracking transaction");
            metrics::set_tracked_transactions(self.entries.len());
        }
        removed
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Start watching `address` for incoming payments from the current tip.
    ///
    /// Any spelling the adapter accepts is folded to its canonical form.
    /// Watching an address twice is a no-op.
    pub fn watch_address(
        &self,
        currency: &str,
        address: &LedgerAddress,
    ) -> SettlementResult<AddressStatus> {
        self.insert_watch(currency, address, None)
    }

    /// Like `watch_address`, but scan from block `from_height` onward.
    ///
    /// An existing watch keeps its cursor.
    pub fn watch_address_from(
        &self,
        currency: &str,
        address: &LedgerAddress,
        from_height: u64,
    ) -> SettlementResult<AddressStatus> {
        self.insert_watch(currency, address, Some(from_height))
    }

    fn insert_watch(
        &self,
        currency: &str,
        address: &LedgerAddress,
        from_height: Option<u64>,
    ) -> SettlementResult<AddressStatus> {
        let adapter = self.registry.get(currency)?;
        let address = adapter.canonical_address(address.as_str())?;
        let status = self
            .addresses
            .entry(address_key(currency, &address))
            .or_insert_with(|| {
                tracing::info!(currency = currency, address = %address, "Watching address for incoming payments");
                let mut watched = WatchedAddress::new(
                    adapter.currency(),
                    address.clone(),
                    adapter.finality_threshold(),
                );
                watched.next_height = from_height;
                watched
            })
            .snapshot();
        metrics::set_watched_addresses(self.addresses.len());
        Ok(status)
    }

    /// Stop watching `address`. Returns false if it was not watched.
    pub fn unwatch_address(&self, currency: &str, address: &LedgerAddress) -> bool {
        let Some(key) = self.canonical_key(currency, address) else {
            return false;
        };
        let removed = self.addresses.remove(&key).is_some();
        if removed {
            tracing::info!(currency = currency, address = %address, "Stopped watching address");
            metrics::set_watched_addresses(self.addresses.len());
        }
        removed
    }

    /// Last known payments into `address`, without touching the network.
    pub fn address_status(&self, currency: &str, address: &LedgerAddress) -> Option<AddressStatus> {
        let key = self.canonical_key(currency, address)?;
        self.addresses.get(&key).map(|w| w.snapshot())
    }

    pub fn watched_address_count(&self) -> usize {
        self.addresses.len()
    }

    fn canonical_key(&self, currency: &str, address: &LedgerAddress) -> Option<String> {
        let adapter = self.registry.get(currency).ok()?;
        let address = adapter.canonical_address(address.as_str()).ok()?;
        Some(address_key(currency, &address))
    }

    /// Scan `address` once from its cursor and merge what the node reports.
    ///
    /// Starts watching the address if it was not watched yet.
    pub async fn poll_address(
        &self,
        currency: &str,
        address: &LedgerAddress,
    ) -> SettlementResult<AddressStatus> {
        let current = self.watch_address(currency, address)?;
        let adapter = self.registry.get(currency)?;
        let scan = adapter
            .incoming_payments(&current.address, current.next_height)
            .await?;

        let key = address_key(currency, &current.address);
        let mut watched = self.addresses.get_mut(&key).ok_or_else(|| {
            SettlementError::Cancelled(format!("watch of {} was removed", current.address))
        })?;
        let outcome = watched.apply(scan, Instant::now());

        for payment in &outcome.detected {
            metrics::record_incoming_payment(&watched.currency, metrics::INCOMING_DETECTED);
            tracing::info!(
                currency = %watched.currency,
                address = %watched.address,
                tx_id = %payment.tx_id,
                amount = %payment.amount,
                confirmations = payment.confirmations,
                "Incoming payment detected"
            );
        }
        for payment in &outcome.finalized {
            metrics::record_incoming_payment(&watched.currency, metrics::INCOMING_FINAL);
            tracing::info!(
                currency = %watched.currency,
                address = %watched.address,
                tx_id = %payment.tx_id,
                amount = %payment.amount,
                confirmations = payment.confirmations,
                "Incoming payment final"
            );
        }
        Ok(watched.snapshot())
    }

    /// Poll every non-terminal entry and every watched address once.
    ///
    /// Returns how many polls failed with `NetworkUnavailable`.
    pub async fn poll_all(&self) -> usize {
        let pending: Vec<(String, TxId)> = self
            .entries
            .iter()
            .filter(|e| !e.state.is_terminal())
            .map(|e| (e.currency.clone(), e.tx_id.clone()))
            .collect();

        let results = join_all(
            pending
                .iter()
                .map(|(currency, tx_id)| self.poll(currency, tx_id)),
        )
        .await;

        let mut unavailable = 0;
        for ((currency, tx_id), result) in pending.iter().zip(results) {
            match result {
                Ok(_) => {}
                Err(SettlementError::NetworkUnavailable(_)) => unavailable += 1,
                Err(e) => {
                    tracing::debug!(currency = %currency, tx_id = %tx_id, error = %e, "Poll failed")
                }
            }
        }

        let watched: Vec<(String, LedgerAddress)> = self
            .addresses
            .iter()
            .map(|w| (w.currency.clone(), w.address.clone()))
            .collect();
        let results = join_all(
            watched
                .iter()
                .map(|(currency, address)| self.poll_address(currency, address)),
        )
        .await;
        for ((currency, address), result) in watched.iter().zip(results) {
            match result {
                Ok(_) => {}
                Err(SettlementError::NetworkUnavailable(_)) => unavailable += 1,
                Err(e) => {
                    tracing::debug!(currency = %currency, address = %address, error = %e, "Address scan failed")
                }
            }
        }
        unavailable
    }

    /// Drop terminal entries older than the retention window, along with
    /// settled and stale payments of watched addresses.
    ///
    /// Returns how many transaction entries were dropped.
    pub fn prune(&self) -> usize {
        let retention = Duration::from_secs(self.config.terminal_retention_secs);
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| match e.finished_at {
            Some(finished) if e.state.is_terminal() => now.duration_since(finished) < retention,
            _ => true,
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            metrics::set_tracked_transactions(self.entries.len());
        }

        let stale_after = self.inclusion_timeout();
        for mut watched in self.addresses.iter_mut() {
            watched.prune(now, retention, stale_after);
        }
        removed
    }

    /// Background monitor: poll all entries until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            "Confirmation monitor started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = Backoff::new(self.config.backoff_base_ms, self.config.backoff_max_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.poll_all().await > 0 {
                let delay = backoff.next_delay();
                tracing::warn!(delay_ms = delay.as_millis() as u64, "Node unavailable, monitor backing off");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            } else {
                backoff.reset();
            }
            self.prune();
        }

        tracing::info!(
            tracked = self.entries.len(),
            watched_addresses = self.addresses.len(),
            "Confirmation monitor stopped"
        );
    }
}

impl std::fmt::Debug for ConfirmationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationTracker")
            .field("tracked", &self.entries.len())
            .field("watched_addresses", &self.addresses.len())
            .field("config", &self.config)
            .finish()
    }
}
