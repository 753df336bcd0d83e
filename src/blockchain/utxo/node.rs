//! Typed boundary to an unspent-output ledger node.
//!
//! Node responses are converted into these types right after the network
//! call; nothing above this layer sees raw JSON.

use async_trait::async_trait;
use bitcoin::{OutPoint, Transaction as BitcoinTransaction, Txid};
use serde::{Deserialize, Serialize};

use crate::blockchain::types::{LedgerAddress, SettlementResult};

/// A spendable output owned by an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub address: LedgerAddress,
    /// Value in satoshi.
    pub amount: u64,
    pub confirmations: u64,
}

/// One input of a transaction as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxInputInfo {
    /// Address of the spent output, when the node can resolve it.
    pub address: Option<String>,
    pub amount: Option<u64>,
}

/// One output of a transaction as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputInfo {
    pub address: Option<String>,
    pub amount: u64,
}

/// Transaction as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTxInfo {
    pub txid: Txid,
    /// Set once the transaction is in a block.
    pub block_hash: Option<String>,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
    pub inputs: Vec<TxInputInfo>,
    pub outputs: Vec<TxOutputInfo>,
    /// Fee in satoshi, when the node knows every prevout.
    pub fee: Option<u64>,
}

/// Operations the UTXO adapter needs from its node.
#[async_trait]
pub trait UtxoNode: Send + Sync {
    /// Unspent outputs of `address` with at least `min_confirmations`.
    async fn list_unspent(
        &self,
        address: &LedgerAddress,
        min_confirmations: u64,
    ) -> SettlementResult<Vec<UnspentOutput>>;

    /// Height of the best block.
    async fn tip_height(&self) -> SettlementResult<u64>;

    /// `None` if the node does not know the transaction.
    async fn transaction(&self, txid: &Txid) -> SettlementResult<Option<UtxoTxInfo>>;

    /// Recommended fee rate in sat/vB, `None` if the node has no estimate.
    async fn fee_rate(&self, conf_target: u16) -> SettlementResult<Option<u64>>;

    /// Submit a fully signed transaction.
    ///
    /// A transaction the node already has is reported as success.
    async fn broadcast(&self, tx: &BitcoinTransaction) -> SettlementResult<Txid>;

    /// Make the node index `address` so `list_unspent` can see it.
    ///
    /// `rescan_from` is a block time (seconds since epoch) from which history
    /// is picked up as well; `None` only indexes activity from now on.
    async fn watch_address(
        &self,
        address: &LedgerAddress,
        rescan_from: Option<u64>,
    ) -> SettlementResult<()>;
}
