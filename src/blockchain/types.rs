//! Ledger-agnostic types and error definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Amount expressed in a ledger's smallest indivisible unit (satoshi, wei).
pub type Subunits = u128;

/// Ledger-scoped address string.
///
/// Validity is ledger specific; adapters check format and checksum before any
/// value is sent to or read from an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerAddress(String);

impl LedgerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LedgerAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for LedgerAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for LedgerAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ledger-assigned transaction identifier.
///
/// Only exists once a broadcast has succeeded (or, for ledgers with
/// deterministic ids, once the transaction is fully signed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TxId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TxId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Ledger view of a transaction's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Known to the node but below the finality threshold.
    Pending,
    /// Reached the configured finality threshold.
    Confirmed,
    /// Included but execution failed.
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Canonical transaction record returned by every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Sender, when the ledger exposes a single one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<LedgerAddress>,
    /// Primary recipient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<LedgerAddress>,
    /// Transferred value in subunits.
    pub amount: Subunits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<Subunits>,
    pub confirmations: u64,
    pub status: TransactionStatus,
    /// Block time (seconds since epoch) once included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    pub currency: String,
    pub explorer_url: String,
}

/// A single outgoing transfer as requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: LedgerAddress,
    pub to: LedgerAddress,
    pub amount: Subunits,
    /// Caller-chosen key identifying this logical payout across retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl TransferRequest {
    pub fn new(from: impl Into<LedgerAddress>, to: impl Into<LedgerAddress>, amount: Subunits) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Stable description of the transfer parameters, used to reject an
    /// idempotency key that is reused for a different payout.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}|{}", self.from, self.to, self.amount)
    }
}

/// Value received by a watched address in one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingPayment {
    pub tx_id: TxId,
    pub address: LedgerAddress,
    /// Total paid to `address` by this transaction, in subunits.
    pub amount: Subunits,
    /// Inclusion height; `None` while in the mempool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub confirmations: u64,
}

impl IncomingPayment {
    /// Recompute confirmations against `tip`.
    pub fn refresh(&mut self, tip: u64) {
        self.confirmations = self
            .block_number
            .map(|height| tip.saturating_sub(height))
            .unwrap_or(0);
    }
}

/// Result of one incoming-payment scan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncomingScan {
    /// Chain tip observed during the scan.
    pub tip: u64,
    /// Highest block the scan covered.
    pub scanned_to: u64,
    pub payments: Vec<IncomingPayment>,
}

/// Errors surfaced at the adapter boundary.
///
/// Ledger-specific payloads (RPC error codes, transport errors) are translated
/// into these variants inside the node clients.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Malformed address or checksum failure. Caller error, never retried.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Funds too low for amount plus fee.
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Subunits, required: Subunits },

    /// Node unreachable or timed out. The outcome of a write may be unknown.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Key/address mismatch or cryptographic failure.
    #[error("Signing error: {0}")]
    SigningError(String),

    /// The node does not know this transaction (yet).
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// The tracker gave up waiting; the transaction may still confirm later.
    #[error("Transaction {tx_id} not confirmed after {waited_secs} seconds")]
    ConfirmationTimeout { tx_id: String, waited_secs: u64 },

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Fee rate exceeded the configured ceiling.
    #[error("Fee rate {current} exceeds maximum {max}")]
    FeeRateTooHigh { current: Subunits, max: Subunits },

    /// The node definitively refused the transaction.
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SettlementError {
    /// Whether a caller may retry the same request after a delay.
    ///
    /// Writes must only be retried with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable(_) | Self::TransactionNotFound(_)
        )
    }
}

/// Result type for settlement operations.
pub type SettlementResult<T> = Result<T, SettlementError>;
