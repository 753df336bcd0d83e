//! Per-transaction confirmation state machine.
//!
//! ```text
//!            ┌─ confirmations ≥ finality ──→ Confirmed
//! Pending ───┼─ execution failed ──────────→ Failed
//!            └─ never included, timeout ───→ TimedOut
//! ```
//!
//! Transitions are one-way. Once terminal, an entry ignores further
//! observations, so its confirmation count is frozen.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::blockchain::types::{Transaction, TransactionStatus, TxId};

/// Tracker view of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Pending,
    Confirmed,
    Failed,
    /// Not included within the inclusion timeout. May still confirm later.
    TimedOut,
}

impl TrackState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single poll of the node saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The node does not know the transaction.
    NotFound,
    /// Known but not yet in a block.
    Unconfirmed,
    Included { confirmations: u64 },
    /// Included, but execution failed.
    ExecutionFailed { confirmations: u64 },
}

impl From<&Transaction> for Observation {
    fn from(tx: &Transaction) -> Self {
        match (tx.block_number, tx.status) {
            (_, TransactionStatus::Failed) => Self::ExecutionFailed {
                confirmations: tx.confirmations,
            },
            (None, _) => Self::Unconfirmed,
            (Some(_), _) => Self::Included {
                confirmations: tx.confirmations,
            },
        }
    }
}

/// One tracked transaction.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub currency: String,
    pub tx_id: TxId,
    pub state: TrackState,
    /// Highest confirmation count observed.
    pub confirmations: u64,
    pub finality: u64,
    pub included: bool,
    pub registered_at: Instant,
    pub finished_at: Option<Instant>,
}

impl TrackedEntry {
    pub fn new(currency: impl Into<String>, tx_id: TxId, finality: u64, now: Instant) -> Self {
        Self {
            currency: currency.into(),
            tx_id,
            state: TrackState::Pending,
            confirmations: 0,
            finality,
            included: false,
            registered_at: now,
            finished_at: None,
        }
    }

    /// Fold an observation into the entry.
    ///
    /// Returns the new state if this observation caused a transition.
    pub fn apply(
        &mut self,
        observation: Observation,
        now: Instant,
        inclusion_timeout: Duration,
    ) -> Option<TrackState> {
        if self.state.is_terminal() {
            return None;
        }

        let next = match observation {
            Observation::NotFound | Observation::Unconfirmed => {
                let waited = now.saturating_duration_since(self.registered_at);
                if !self.included && waited >= inclusion_timeout {
                    TrackState::TimedOut
                } else {
                    TrackState::Pending
                }
            }
            Observation::Included { confirmations } => {
                self.included = true;
                self.confirmations = self.confirmations.max(confirmations);
                if self.confirmations >= self.finality {
                    TrackState::Confirmed
                } else {
                    TrackState::Pending
                }
            }
            Observation::ExecutionFailed { confirmations } => {
                self.included = true;
                self.confirmations = self.confirmations.max(confirmations);
                TrackState::Failed
            }
        };

        if next == self.state {
            return None;
        }
        self.state = next;
        self.finished_at = Some(now);
        Some(next)
    }

    pub fn snapshot(&self) -> TrackedStatus {
        TrackedStatus {
            currency: self.currency.clone(),
            tx_id: self.tx_id.clone(),
            state: self.state,
            confirmations: self.confirmations,
            finality: self.finality,
        }
    }
}

/// Point-in-time view handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedStatus {
    pub currency: String,
    pub tx_id: TxId,
    pub state: TrackState,
    pub confirmations: u64,
    pub finality: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(600);

    fn entry(now: Instant) -> TrackedEntry {
        TrackedEntry::new("BTC", TxId::from("ab"), 3, now)
    }

    #[test]
    fn test_confirms_at_finality() {
        let start = Instant::now();
        let mut e = entry(start);
        assert_eq!(e.apply(Observation::Unconfirmed, start, TIMEOUT), None);
        assert_eq!(e.apply(Observation::Included { confirmations: 2 }, start, TIMEOUT), None);
        assert_eq!(
            e.apply(Observation::Included { confirmations: 3 }, start, TIMEOUT),
            Some(TrackState::Confirmed)
        );
        assert!(e.finished_at.is_some());
    }

    #[test]
    fn test_confirmations_never_decrease() {
        let start = Instant::now();
        let mut e = entry(start);
        e.apply(Observation::Included { confirmations: 2 }, start, TIMEOUT);
        e.apply(Observation::Included { confirmations: 1 }, start, TIMEOUT);
        assert_eq!(e.confirmations, 2);
        assert_eq!(e.state, TrackState::Pending);
    }

    #[test]
    fn test_terminal_state_frozen() {
        let start = Instant::now();
        let mut e = entry(start);
        e.apply(Observation::Included { confirmations: 5 }, start, TIMEOUT);
        assert_eq!(e.state, TrackState::Confirmed);

        assert_eq!(e.apply(Observation::Included { confirmations: 9 }, start, TIMEOUT), None);
        assert_eq!(e.apply(Observation::ExecutionFailed { confirmations: 9 }, start, TIMEOUT), None);
        assert_eq!(e.confirmations, 5);
        assert_eq!(e.state, TrackState::Confirmed);
    }

    #[test]
    fn test_execution_failure_is_terminal() {
        let start = Instant::now();
        let mut e = entry(start);
        assert_eq!(
            e.apply(Observation::ExecutionFailed { confirmations: 0 }, start, TIMEOUT),
            Some(TrackState::Failed)
        );
    }

    #[test]
    fn test_times_out_only_if_never_included() {
        let start = Instant::now();
        let late = start + TIMEOUT;

        let mut never = entry(start);
        assert_eq!(never.apply(Observation::NotFound, late, TIMEOUT), Some(TrackState::TimedOut));

        let mut seen = entry(start);
        seen.apply(Observation::Included { confirmations: 1 }, start, TIMEOUT);
        // Reorged out after inclusion: keep waiting.
        assert_eq!(seen.apply(Observation::NotFound, late, TIMEOUT), None);
        assert_eq!(seen.state, TrackState::Pending);
    }

    #[test]
    fn test_observation_from_transaction() {
        let mut tx = Transaction {
            id: TxId::from("ab"),
            block_hash: None,
            block_number: None,
            from: None,
            to: None,
            amount: 1,
            fee: None,
            confirmations: 0,
            status: TransactionStatus::Pending,
            timestamp: None,
            currency: "ETH".to_string(),
            explorer_url: String::new(),
        };
        assert_eq!(Observation::from(&tx), Observation::Unconfirmed);

        tx.block_number = Some(10);
        tx.confirmations = 4;
        assert_eq!(Observation::from(&tx), Observation::Included { confirmations: 4 });

        tx.status = TransactionStatus::Failed;
        assert_eq!(Observation::from(&tx), Observation::ExecutionFailed { confirmations: 4 });
    }
}
