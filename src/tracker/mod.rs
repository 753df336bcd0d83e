//! Confirmation tracking subsystem.
//!
//! # Data Flow
//! ```text
//! TxId from build_and_send
//!     → ConfirmationTracker::watch (entry in Pending)
//!     → poll / wait / run (adapter.get_transaction per tick)
//!     → state.rs (Observation → TrackState)
//!     → Confirmed | Failed | TimedOut
//!
//! LedgerAddress
//!     → ConfirmationTracker::watch_address (cursor unset)
//!     → poll_address / run (adapter.incoming_payments from the cursor)
//!     → watch.rs (merge by tx id, advance cursor)
//!     → detected → final
//! ```
//!
//! # Design Decisions
//! - `poll` is a single node round trip; `wait` suspends until a terminal
//!   state, its own deadline, or cancellation
//! - Node outages back off exponentially instead of polling at full rate
//! - Cancelling a wait removes the entry, never the transaction
//! - Address watches scan forward from a per-address block cursor, the same
//!   way an event monitor walks from its last processed block

pub mod confirmation;
pub mod state;
pub mod watch;

pub use confirmation::ConfirmationTracker;
pub use state::{Observation, TrackState, TrackedEntry, TrackedStatus};
pub use watch::{AddressStatus, ScanOutcome, WatchedAddress};
