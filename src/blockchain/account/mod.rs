//! Account-balance ledger adapter (Ethereum).
//!
//! # Data Flow
//! ```text
//! build_and_send(request, key)
//!     → canonical addresses (EIP-55 check when mixed case, checksummed out)
//!     → [per-address lock, held through broadcast]
//!         idempotency check
//!         → pending nonce (always from the node, never cached)
//!         → gas price × multiplier, ceiling check
//!         → pending balance ≥ amount + gas_limit × gas_price
//!         → signer.rs (legacy EIP-155 transfer)
//!         → record signed transfer → node.broadcast
//!     → TxId (transaction hash)
//! ```
//!
//! # Design Decisions
//! - The lock covers nonce fetch through broadcast: releasing it earlier lets
//!   a second sender read the same pending nonce
//! - A receipt with failed execution maps to `Failed`, regardless of depth
//! - Idempotency fingerprints use checksummed addresses, so a retry spelled
//!   in lowercase still matches the original attempt
//! - Incoming payments are found by reading blocks; a JSON-RPC node has no
//!   per-address history, so each scan reads a bounded block range

pub mod node;
pub mod rpc;
pub mod signer;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::blockchain::adapter::ChainAdapter;
use crate::blockchain::fee::{FeeQuote, GasFeeEstimator};
use crate::blockchain::idempotency::IdempotencyLedger;
use crate::blockchain::locks::AddressLocks;
use crate::blockchain::types::{
    IncomingPayment, IncomingScan, LedgerAddress, SettlementError, SettlementResult, Subunits,
    Transaction, TransactionStatus, TransferRequest, TxId,
};
use crate::blockchain::units::UnitConverter;
use crate::config::AccountLedgerConfig;
use crate::keys::{KeyManager, KeyMaterial};
use crate::observability::metrics;

pub use node::{AccountNode, AccountReceipt, AccountTxInfo, SignedTransfer};
pub use rpc::AlloyNode;
pub use signer::{TransferParams, TransferSigner};

/// Parse a 0x-prefixed, 20-byte hex address.
///
/// All-lowercase and all-uppercase forms carry no checksum; mixed case must
/// be a valid EIP-55 checksum.
pub fn parse_account_address(address: &str) -> SettlementResult<Address> {
    let invalid = |reason: &str| SettlementError::InvalidAddress(format!("{}: {}", address, reason));

    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| invalid("missing 0x prefix"))?;
    if digits.len() != 40 {
        return Err(invalid("expected 40 hex digits"));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("non-hex character"));
    }

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(address, None).map_err(|_| invalid("bad EIP-55 checksum"))
    } else {
        Address::from_str(address).map_err(|e| invalid(&e.to_string()))
    }
}

/// Chain adapter for an Ethereum-style ledger.
pub struct AccountAdapter {
    config: AccountLedgerConfig,
    node: Arc<dyn AccountNode>,
    keys: KeyManager,
    fees: GasFeeEstimator,
    signer: TransferSigner,
    locks: AddressLocks,
    sent: IdempotencyLedger<SignedTransfer>,
}

impl AccountAdapter {
    pub fn new(config: AccountLedgerConfig, node: Arc<dyn AccountNode>, keys: KeyManager) -> Self {
        let fees = GasFeeEstimator::new(
            config.transfer_gas_limit,
            config.gas_price_multiplier,
            config.max_gas_price_wei(),
        );

        tracing::info!(
            currency = %config.currency,
            chain_id = config.chain_id,
            finality = config.finality_confirmations,
            gas_limit = config.transfer_gas_limit,
            "Account adapter initialized"
        );
        if config.explorer_base().is_none() {
            tracing::warn!(
                currency = %config.currency,
                network = %config.network,
                "No explorer configured, transaction links will be empty"
            );
        }

        Self {
            signer: TransferSigner::new(config.chain_id),
            node,
            keys,
            fees,
            locks: AddressLocks::new(),
            sent: IdempotencyLedger::with_retention(Duration::from_secs(
                config.idempotency_retention_secs,
            )),
            config,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Number of sending addresses currently locked or waited on.
    pub fn locked_addresses(&self) -> usize {
        self.locks.len()
    }

    /// Number of idempotency keys still replayable.
    pub fn recorded_attempts(&self) -> usize {
        self.sent.len()
    }

    /// Verify the node serves the configured chain.
    pub async fn verify_chain_id(&self) -> SettlementResult<()> {
        let actual = self.node.chain_id().await?;
        if actual != self.config.chain_id {
            return Err(SettlementError::ChainMismatch {
                expected: self.config.chain_id,
                actual,
            });
        }
        Ok(())
    }

    fn parse_hash(&self, tx_id: &TxId) -> SettlementResult<B256> {
        B256::from_str(tx_id.as_str())
            .map_err(|_| SettlementError::TransactionNotFound(tx_id.to_string()))
    }

    async fn current_gas_price(&self) -> SettlementResult<u128> {
        let node_price = self.node.gas_price().await?;
        self.fees.resolve_gas_price(node_price)
    }

    async fn replay(&self, tx_id: TxId, signed: &SignedTransfer) -> SettlementResult<TxId> {
        if self.node.transaction(signed.hash).await?.is_some() {
            tracing::info!(tx_id = %tx_id, "Idempotent retry: transaction already known to node");
            return Ok(tx_id);
        }

        tracing::info!(tx_id = %tx_id, nonce = signed.nonce, "Idempotent retry: rebroadcasting recorded transaction");
        self.node.broadcast(signed).await?;
        metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_REPLAYED);
        Ok(tx_id)
    }
}

#[async_trait]
impl ChainAdapter for AccountAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn currency(&self) -> &str {
        &self.config.currency
    }

    fn units(&self) -> UnitConverter {
        UnitConverter::ETHER
    }

    fn finality_threshold(&self) -> u64 {
        self.config.finality_confirmations
    }

    fn canonical_address(&self, address: &str) -> SettlementResult<LedgerAddress> {
        Ok(LedgerAddress::new(parse_account_address(address)?.to_checksum(None)))
    }

    fn explorer_url(&self, tx_id: &TxId) -> String {
        match self.config.explorer_base() {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), tx_id),
            None => String::new(),
        }
    }

    fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    fn address_for_key(&self, key: &KeyMaterial) -> SettlementResult<LedgerAddress> {
        Ok(LedgerAddress::new(TransferSigner::address_for(key)?.to_checksum(None)))
    }

    fn encode_key(&self, key: &KeyMaterial) -> SettlementResult<String> {
        Ok(key.to_hex())
    }

    fn decode_key(&self, encoded: &str) -> SettlementResult<KeyMaterial> {
        KeyMaterial::from_hex(encoded)
    }

    async fn get_balance(&self, address: &LedgerAddress) -> SettlementResult<Subunits> {
        let address = parse_account_address(address.as_str())?;
        self.node.balance(address).await
    }

    async fn build_and_send(
        &self,
        request: &TransferRequest,
        key: &KeyMaterial,
    ) -> SettlementResult<TxId> {
        let request = &self.canonical_request(request)?;
        let from = parse_account_address(request.from.as_str())?;
        let to = parse_account_address(request.to.as_str())?;
        if request.amount == 0 {
            return Err(SettlementError::InvalidAmount("amount must be > 0".to_string()));
        }

        let _guard = self.locks.acquire(request.from.as_str()).await;

        if let Some(prior) = self.sent.prior_attempt(request)? {
            return self.replay(prior.tx_id, &prior.signed).await;
        }

        let nonce = self.node.pending_nonce(from).await?;
        let gas_price = self.current_gas_price().await?;
        let fee = self.fees.fee_for(gas_price)?;
        let required = request.amount.checked_add(fee).ok_or_else(|| {
            SettlementError::InvalidAmount(format!("{} plus fee overflows", request.amount))
        })?;

        let available = self.node.pending_balance(from).await?;
        if available < required {
            return Err(SettlementError::InsufficientBalance { available, required });
        }

        let signed = self
            .signer
            .sign(
                TransferParams {
                    from,
                    to,
                    value: request.amount,
                    nonce,
                    gas_limit: self.fees.gas_limit(),
                    gas_price,
                },
                key,
            )
            .await?;
        let tx_id = TxId::new(signed.hash.to_string());
        self.sent.record(request, tx_id.clone(), signed.clone());

        tracing::info!(
            currency = %self.config.currency,
            tx_id = %tx_id,
            from = %request.from,
            to = %request.to,
            amount = %request.amount,
            nonce = nonce,
            gas_price = %gas_price,
            "Broadcasting transaction"
        );

        match self.node.broadcast(&signed).await {
            Ok(_) => {
                metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_ACCEPTED);
                metrics::record_fee(&self.config.currency, fee);
                Ok(tx_id)
            }
            Err(SettlementError::BroadcastRejected(reason)) => {
                tracing::warn!(tx_id = %tx_id, nonce = nonce, reason = %reason, "Broadcast rejected");
                if let Some(key) = request.idempotency_key.as_deref() {
                    self.sent.forget(key);
                }
                metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_REJECTED);
                Err(SettlementError::BroadcastRejected(reason))
            }
            Err(e) => {
                tracing::warn!(tx_id = %tx_id, nonce = nonce, error = %e, "Broadcast outcome unknown");
                metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_UNKNOWN);
                Err(e)
            }
        }
    }

    async fn estimate_fee(
        &self,
        from: &LedgerAddress,
        to: &LedgerAddress,
        _amount: Subunits,
    ) -> SettlementResult<FeeQuote> {
        parse_account_address(from.as_str())?;
        parse_account_address(to.as_str())?;
        let gas_price = self.current_gas_price().await?;
        self.fees.quote(&self.config.currency, gas_price)
    }

    async fn get_transaction(&self, tx_id: &TxId) -> SettlementResult<Transaction> {
        let hash = self.parse_hash(tx_id)?;
        let info = self
            .node
            .transaction(hash)
            .await?
            .ok_or_else(|| SettlementError::TransactionNotFound(tx_id.to_string()))?;
        let receipt = self.node.receipt(hash).await?;

        let mut tx = Transaction {
            id: tx_id.clone(),
            block_hash: info.block_hash.map(|h| h.to_string()),
            block_number: info.block_number,
            from: Some(LedgerAddress::new(info.from.to_checksum(None))),
            to: info.to.map(|a| LedgerAddress::new(a.to_checksum(None))),
            amount: info.value,
            fee: None,
            confirmations: 0,
            status: TransactionStatus::Pending,
            timestamp: None,
            currency: self.config.currency.clone(),
            explorer_url: self.explorer_url(tx_id),
        };

        if let Some(receipt) = receipt {
            let tip = self.node.block_number().await?;
            tx.confirmations = tip.saturating_sub(receipt.block_number);
            tx.block_number = Some(receipt.block_number);
            if let Some(hash) = receipt.block_hash {
                tx.block_hash = Some(hash.to_string());
            }
            tx.fee = Some((receipt.gas_used as u128).saturating_mul(receipt.effective_gas_price));
            tx.timestamp = self.node.block_timestamp(receipt.block_number).await?;
            tx.status = if !receipt.success {
                TransactionStatus::Failed
            } else if tx.confirmations >= self.config.finality_confirmations {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Pending
            };
        }

        Ok(tx)
    }

    async fn get_confirmations(&self, tx_id: &TxId) -> SettlementResult<u64> {
        let hash = self.parse_hash(tx_id)?;
        if let Some(receipt) = self.node.receipt(hash).await? {
            let tip = self.node.block_number().await?;
            return Ok(tip.saturating_sub(receipt.block_number));
        }
        match self.node.transaction(hash).await? {
            Some(_) => Ok(0),
            None => Err(SettlementError::TransactionNotFound(tx_id.to_string())),
        }
    }

    async fn is_healthy(&self) -> bool {
        let healthy = self.node.block_number().await.is_ok();
        metrics::record_node_health(&self.config.name, healthy);
        healthy
    }

    async fn incoming_payments(
        &self,
        address: &LedgerAddress,
        from_height: Option<u64>,
    ) -> SettlementResult<IncomingScan> {
        let canonical = self.canonical_address(address.as_str())?;
        let target = parse_account_address(canonical.as_str())?;
        let tip = self.node.block_number().await?;
        let from = from_height.unwrap_or(tip);
        if from > tip {
            return Ok(IncomingScan {
                tip,
                scanned_to: from.saturating_sub(1),
                payments: Vec::new(),
            });
        }

        let span = self.config.incoming_scan_max_blocks.max(1);
        let last = tip.min(from.saturating_add(span - 1));
        let mut payments = Vec::new();
        for number in from..=last {
            for tx in self.node.block_transactions(number).await? {
                if tx.to != Some(target) || tx.value == 0 {
                    continue;
                }
                // A reverted call moves no value.
                if matches!(self.node.receipt(tx.hash).await?, Some(r) if !r.success) {
                    continue;
                }
                let mut payment = IncomingPayment {
                    tx_id: TxId::new(tx.hash.to_string()),
                    address: canonical.clone(),
                    amount: tx.value,
                    block_number: Some(number),
                    confirmations: 0,
                };
                payment.refresh(tip);
                payments.push(payment);
            }
        }

        tracing::debug!(
            currency = %self.config.currency,
            address = %canonical,
            from = from,
            to = last,
            found = payments.len(),
            "Scanned blocks for incoming payments"
        );

        Ok(IncomingScan {
            tip,
            scanned_to: last,
            payments,
        })
    }
}

impl std::fmt::Debug for AccountAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountAdapter")
            .field("currency", &self.config.currency)
            .field("chain_id", &self.config.chain_id)
            .finish()
    }
}
