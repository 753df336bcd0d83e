//! Ledger settlement subsystem.
//!
//! # Data Flow
//! ```text
//! caller (currency code)
//!     → registry.rs (currency → Arc<dyn ChainAdapter>)
//!     → adapter.rs (uniform contract)
//!         → utxo/    (input selection, P2WPKH signing, bitcoind RPC)
//!         → account/ (nonce, gas, alloy signing and RPC)
//!     → TxId
//!     → tracker (confirmations until final)
//! ```
//!
//! # Security Constraints
//! - Key material reaches an adapter only at sign time, from `KeyManager`
//! - Never log private keys or sensitive data
//! - All node calls have configurable timeouts
//! - Sends from one address are serialized (`locks.rs`)

pub mod account;
pub mod adapter;
pub mod fee;
pub mod idempotency;
pub mod locks;
pub mod registry;
pub mod types;
pub mod units;
pub mod utxo;

pub use account::AccountAdapter;
pub use adapter::ChainAdapter;
pub use fee::{FeeBasis, FeeQuote, GasFeeEstimator, SizeModel, UtxoFeeEstimator};
pub use registry::AdapterRegistry;
pub use types::{
    IncomingPayment, IncomingScan, LedgerAddress, SettlementError, SettlementResult, Subunits,
    Transaction, TransactionStatus, TransferRequest, TxId,
};
pub use units::UnitConverter;
pub use utxo::UtxoAdapter;
