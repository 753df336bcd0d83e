//! JSON-RPC node client with timeout and provider failover.
//!
//! # Responsibilities
//! - Connect to the primary endpoint plus any failover endpoints
//! - Query chain state (nonce, balances, transactions, receipts, blocks)
//! - Submit raw signed transactions
//! - Translate provider errors into `SettlementError`

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::account::node::{AccountNode, AccountReceipt, AccountTxInfo, SignedTransfer};
use crate::blockchain::types::{SettlementError, SettlementResult};
use crate::config::AccountLedgerConfig;

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// Node errors meaning the transaction is already in the mempool or chain.
const ALREADY_KNOWN: [&str; 3] = ["already known", "known transaction", "already imported"];

fn tx_info(tx: &alloy::rpc::types::Transaction) -> AccountTxInfo {
    AccountTxInfo {
        hash: alloy::network::TransactionResponse::tx_hash(tx),
        from: alloy::network::TransactionResponse::from(tx),
        to: alloy::consensus::Transaction::to(tx),
        value: alloy::consensus::Transaction::value(tx).saturating_to::<u128>(),
        block_number: tx.block_number,
        block_hash: tx.block_hash,
    }
}

/// Account node client backed by alloy providers.
#[derive(Clone)]
pub struct AlloyNode {
    /// Primary first, then failovers in configured order.
    providers: Vec<DynProvider>,
    endpoints: Vec<String>,
    timeout_duration: Duration,
}

impl AlloyNode {
    pub fn new(config: &AccountLedgerConfig) -> SettlementResult<Self> {
        let mut providers = Vec::new();
        let mut endpoints = Vec::new();

        let primary: url::Url = config.rpc_url.parse().map_err(|e| {
            SettlementError::Config(format!("invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary)) as DynProvider);
        endpoints.push(config.rpc_url.clone());

        for url_str in &config.failover_urls {
            match url_str.parse::<url::Url>() {
                Ok(url) => {
                    providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider);
                    endpoints.push(url_str.clone());
                }
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        tracing::info!(
            rpc_url = %config.rpc_url,
            failovers = providers.len() - 1,
            chain_id = config.chain_id,
            "Account node client initialized"
        );

        Ok(Self {
            providers,
            endpoints,
            timeout_duration: Duration::from_secs(config.rpc_timeout_secs),
        })
    }

    /// Run `call` against each provider in turn until one answers.
    async fn with_failover<T, F, Fut>(&self, op: &'static str, call: F) -> SettlementResult<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, op = op, error = %e, "RPC error, trying next provider")
                }
                Err(_) => tracing::warn!(provider_idx = i, op = op, "RPC timeout, trying next provider"),
            }
        }
        Err(SettlementError::NetworkUnavailable(format!(
            "all account providers failed: {}",
            op
        )))
    }
}

#[async_trait]
impl AccountNode for AlloyNode {
    async fn chain_id(&self) -> SettlementResult<u64> {
        self.with_failover("eth_chainId", |p| async move { p.get_chain_id().await })
            .await
    }

    async fn balance(&self, address: Address) -> SettlementResult<u128> {
        let balance = self
            .with_failover("eth_getBalance", |p| async move { p.get_balance(address).await })
            .await?;
        Ok(balance.saturating_to::<u128>())
    }

    async fn pending_balance(&self, address: Address) -> SettlementResult<u128> {
        let balance = self
            .with_failover("eth_getBalance", |p| async move {
                p.get_balance(address).pending().await
            })
            .await?;
        Ok(balance.saturating_to::<u128>())
    }

    async fn pending_nonce(&self, address: Address) -> SettlementResult<u64> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address).pending().await
        })
        .await
    }

    async fn gas_price(&self) -> SettlementResult<u128> {
        self.with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn block_number(&self) -> SettlementResult<u64> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
    }

    async fn block_timestamp(&self, number: u64) -> SettlementResult<Option<u64>> {
        let block = self
            .with_failover("eth_getBlockByNumber", |p| async move {
                p.get_block_by_number(BlockNumberOrTag::Number(number)).await
            })
            .await?;
        Ok(block.map(|b| b.header.timestamp))
    }

    async fn transaction(&self, hash: B256) -> SettlementResult<Option<AccountTxInfo>> {
        let tx = self
            .with_failover("eth_getTransactionByHash", |p| async move {
                p.get_transaction_by_hash(hash).await
            })
            .await?;

        Ok(tx.map(|tx| AccountTxInfo {
            hash,
            ..tx_info(&tx)
        }))
    }

    async fn block_transactions(&self, number: u64) -> SettlementResult<Vec<AccountTxInfo>> {
        let block = self
            .with_failover("eth_getBlockByNumber", |p| async move {
                p.get_block_by_number(BlockNumberOrTag::Number(number))
                    .full()
                    .await
            })
            .await?;
        Ok(block
            .map(|b| b.transactions.txns().map(tx_info).collect())
            .unwrap_or_default())
    }

    async fn receipt(&self, hash: B256) -> SettlementResult<Option<AccountReceipt>> {
        let receipt = self
            .with_failover("eth_getTransactionReceipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;

        Ok(receipt.and_then(|r| {
            // A receipt without a block number is a pending-block artifact.
            let block_number = r.block_number?;
            Some(AccountReceipt {
                block_number,
                block_hash: r.block_hash,
                success: alloy::network::ReceiptResponse::status(&r),
                gas_used: r.gas_used,
                effective_gas_price: r.effective_gas_price,
            })
        }))
    }

    async fn broadcast(&self, transfer: &SignedTransfer) -> SettlementResult<B256> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.send_raw_transaction(&transfer.raw)).await {
                Ok(Ok(pending)) => return Ok(*pending.tx_hash()),
                Ok(Err(e)) => {
                    if let Some(payload) = e.as_error_resp() {
                        let message = payload.message.to_lowercase();
                        if ALREADY_KNOWN.iter().any(|m| message.contains(m)) {
                            tracing::debug!(tx_hash = %transfer.hash, "Node already has transaction");
                            return Ok(transfer.hash);
                        }
                        return Err(SettlementError::BroadcastRejected(payload.message.to_string()));
                    }
                    tracing::warn!(provider_idx = i, error = %e, "Broadcast failed, trying next provider");
                }
                Err(_) => tracing::warn!(provider_idx = i, "Broadcast timeout, trying next provider"),
            }
        }
        Err(SettlementError::NetworkUnavailable(format!(
            "broadcast of {} outcome unknown: all providers failed",
            transfer.hash
        )))
    }
}

impl std::fmt::Debug for AlloyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyNode")
            .field("endpoints", &self.endpoints)
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}
