//! Per-address view of incoming value.
//!
//! Each scan result is merged by transaction id: first sightings are
//! reported once, confirmations only grow, and a payment is reported again
//! when it reaches finality. The scan cursor never moves backwards.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::blockchain::types::{IncomingPayment, IncomingScan, LedgerAddress, Subunits};

#[derive(Debug, Clone)]
struct ReceivedPayment {
    payment: IncomingPayment,
    last_seen: Instant,
    finalized_at: Option<Instant>,
}

/// What merging one scan changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Payments seen for the first time.
    pub detected: Vec<IncomingPayment>,
    /// Payments that reached finality in this scan.
    pub finalized: Vec<IncomingPayment>,
}

/// One watched receiving address.
#[derive(Debug, Clone)]
pub struct WatchedAddress {
    pub currency: String,
    pub address: LedgerAddress,
    pub finality: u64,
    /// Next block to scan; `None` until the first scan anchors it at the tip.
    pub next_height: Option<u64>,
    payments: BTreeMap<String, ReceivedPayment>,
}

impl WatchedAddress {
    pub fn new(currency: impl Into<String>, address: LedgerAddress, finality: u64) -> Self {
        Self {
            currency: currency.into(),
            address,
            finality,
            next_height: None,
            payments: BTreeMap::new(),
        }
    }

    fn is_final(&self, payment: &IncomingPayment) -> bool {
        payment.block_number.is_some() && payment.confirmations >= self.finality
    }

    /// Fold a scan into the address state.
    pub fn apply(&mut self, scan: IncomingScan, now: Instant) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        for seen in scan.payments {
            match self.payments.get_mut(seen.tx_id.as_str()) {
                Some(known) => {
                    known.last_seen = now;
                    if known.payment.block_number.is_none() {
                        known.payment.block_number = seen.block_number;
                    }
                }
                None => {
                    outcome.detected.push(seen.clone());
                    self.payments.insert(
                        seen.tx_id.to_string(),
                        ReceivedPayment {
                            payment: seen,
                            last_seen: now,
                            finalized_at: None,
                        },
                    );
                }
            }
        }

        let finality = self.finality;
        for received in self.payments.values_mut() {
            if received.finalized_at.is_some() {
                continue;
            }
            let before = received.payment.confirmations;
            received.payment.refresh(scan.tip);
            received.payment.confirmations = received.payment.confirmations.max(before);
            if received.payment.block_number.is_some() && received.payment.confirmations >= finality {
                received.finalized_at = Some(now);
                outcome.finalized.push(received.payment.clone());
            }
        }

        let next = scan.scanned_to.saturating_add(1);
        self.next_height = Some(self.next_height.map_or(next, |current| current.max(next)));
        outcome
    }

    /// Drop final payments older than `retention` and mempool payments not
    /// seen for `stale_after`. Returns how many were dropped.
    pub fn prune(&mut self, now: Instant, retention: Duration, stale_after: Duration) -> usize {
        let before = self.payments.len();
        self.payments.retain(|_, received| match received.finalized_at {
            Some(finalized) => now.duration_since(finalized) < retention,
            None if received.payment.block_number.is_none() => {
                now.duration_since(received.last_seen) < stale_after
            }
            None => true,
        });
        before - self.payments.len()
    }

    pub fn snapshot(&self) -> AddressStatus {
        AddressStatus {
            currency: self.currency.clone(),
            address: self.address.clone(),
            finality: self.finality,
            next_height: self.next_height,
            payments: self
                .payments
                .values()
                .map(|r| r.payment.clone())
                .collect(),
        }
    }

    /// Payments not yet final.
    pub fn pending_count(&self) -> usize {
        self.payments
            .values()
            .filter(|r| !self.is_final(&r.payment))
            .count()
    }
}

/// Point-in-time view of a watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressStatus {
    pub currency: String,
    pub address: LedgerAddress,
    pub finality: u64,
    pub next_height: Option<u64>,
    pub payments: Vec<IncomingPayment>,
}

impl AddressStatus {
    /// Value received in payments that reached finality.
    pub fn settled_amount(&self) -> Subunits {
        self.payments
            .iter()
            .filter(|p| p.block_number.is_some() && p.confirmations >= self.finality)
            .map(|p| p.amount)
            .sum()
    }

    /// Value received but not yet final, including the mempool.
    pub fn pending_amount(&self) -> Subunits {
        self.payments
            .iter()
            .filter(|p| p.block_number.is_none() || p.confirmations < self.finality)
            .map(|p| p.amount)
            .sum()
    }
}
