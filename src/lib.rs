//! Multi-ledger settlement library.
//!
//! Generates receiving addresses, reads balances, and builds, signs and
//! broadcasts payouts on an unspent-output ledger (Bitcoin) and an
//! account-balance ledger (Ethereum) behind one `ChainAdapter` contract.
//!
//! ```text
//!   caller ──currency──▶ AdapterRegistry ──▶ ChainAdapter
//!                                              ├─ UtxoAdapter ──▶ bitcoind RPC
//!                                              └─ AccountAdapter ──▶ JSON-RPC (alloy)
//!   caller ──TxId──────▶ ConfirmationTracker ──▶ ChainAdapter::get_transaction
//! ```

// Core subsystems
pub mod blockchain;
pub mod keys;
pub mod tracker;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use blockchain::{
    AccountAdapter, AdapterRegistry, ChainAdapter, FeeQuote, IncomingPayment, LedgerAddress,
    SettlementError, SettlementResult, Subunits, Transaction, TransactionStatus, TransferRequest, TxId,
    UnitConverter, UtxoAdapter,
};
pub use config::SettlementConfig;
pub use keys::KeyManager;
pub use lifecycle::Shutdown;
pub use tracker::{AddressStatus, ConfirmationTracker, TrackState, TrackedStatus};
