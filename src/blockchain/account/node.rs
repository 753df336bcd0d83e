//! Typed boundary to an account-model ledger node.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blockchain::types::SettlementResult;

/// A transaction as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTxInfo {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    /// Value in wei.
    pub value: u128,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
}

/// Execution result of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountReceipt {
    pub block_number: u64,
    pub block_hash: Option<B256>,
    /// `false` when execution reverted.
    pub success: bool,
    pub gas_used: u64,
    /// Price actually paid per unit of gas, in wei.
    pub effective_gas_price: u128,
}

/// A signed value transfer ready for submission.
///
/// `raw` is the EIP-2718 encoding; the other fields describe what was signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    pub hash: B256,
    pub raw: Bytes,
    pub from: Address,
    pub to: Address,
    pub value: u128,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

impl SignedTransfer {
    /// Maximum the sender can be charged in fees.
    pub fn max_fee(&self) -> u128 {
        (self.gas_limit as u128).saturating_mul(self.gas_price)
    }
}

/// Operations the account adapter needs from its node.
#[async_trait]
pub trait AccountNode: Send + Sync {
    async fn chain_id(&self) -> SettlementResult<u64>;

    /// Balance at the latest block.
    async fn balance(&self, address: Address) -> SettlementResult<u128>;

    /// Balance including the effect of pending transactions.
    async fn pending_balance(&self, address: Address) -> SettlementResult<u128>;

    /// Next nonce, counting transactions still in the mempool.
    async fn pending_nonce(&self, address: Address) -> SettlementResult<u64>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> SettlementResult<u128>;

    async fn block_number(&self) -> SettlementResult<u64>;

    /// Timestamp of block `number`, `None` if unknown.
    async fn block_timestamp(&self, number: u64) -> SettlementResult<Option<u64>>;

    async fn transaction(&self, hash: B256) -> SettlementResult<Option<AccountTxInfo>>;

    /// Every transaction included in block `number`; empty if the block is
    /// not known yet.
    async fn block_transactions(&self, number: u64) -> SettlementResult<Vec<AccountTxInfo>>;

    /// `None` until the transaction is included.
    async fn receipt(&self, hash: B256) -> SettlementResult<Option<AccountReceipt>>;

    /// Submit a signed transfer. A transaction the node already has is
    /// reported as success.
    async fn broadcast(&self, transfer: &SignedTransfer) -> SettlementResult<B256>;
}
