//! Unspent-output ledger adapter (Bitcoin).
//!
//! # Data Flow
//! ```text
//! build_and_send(request, key)
//!     → canonical addresses
//!     → [per-address lock]
//!         idempotency check → fee rate → list_unspent − reserved
//!         → selection.rs (largest-first, two-pass fee)
//!         → signer.rs (P2WPKH witness per input)
//!         → reserve outpoints, record signed tx
//!     → [lock released]
//!     → node.broadcast → TxId
//! ```
//!
//! # Design Decisions
//! - Outpoints of a broadcast transaction stay reserved until the node stops
//!   listing them (or the reservation expires), so the lock can be released
//!   before broadcast I/O without two spends ever sharing an input
//! - A definitive node rejection releases the reservation; an unknown
//!   outcome keeps it
//! - Locks, reservations and idempotency records are keyed by the canonical
//!   (lowercase bech32) address, whatever spelling the caller used
//! - Confirmations are tip height minus inclusion height
//! - Incoming payments come from the node wallet's view of the address;
//!   outputs of transactions the address itself funded are change, not income

pub mod node;
pub mod rpc;
pub mod selection;
pub mod signer;

use async_trait::async_trait;
use bitcoin::{Address, Network, OutPoint, Transaction as BitcoinTransaction, Txid};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::blockchain::adapter::ChainAdapter;
use crate::blockchain::fee::{FeeQuote, UtxoFeeEstimator};
use crate::blockchain::idempotency::IdempotencyLedger;
use crate::blockchain::locks::AddressLocks;
use crate::blockchain::types::{
    IncomingPayment, IncomingScan, LedgerAddress, SettlementError, SettlementResult, Subunits,
    Transaction, TransactionStatus, TransferRequest, TxId,
};
use crate::blockchain::units::UnitConverter;
use crate::config::{NetworkMode, UtxoLedgerConfig};
use crate::keys::{KeyManager, KeyMaterial};
use crate::observability::metrics;

pub use node::{TxInputInfo, TxOutputInfo, UnspentOutput, UtxoNode, UtxoTxInfo};
pub use rpc::BitcoindRpc;
pub use selection::{select_inputs, Selection};
pub use signer::P2wpkhSigner;

/// Map the configured network mode onto a `bitcoin::Network`.
pub fn bitcoin_network(mode: NetworkMode) -> Network {
    match mode {
        NetworkMode::Main => Network::Bitcoin,
        NetworkMode::Test => Network::Testnet,
        NetworkMode::Signet => Network::Signet,
        NetworkMode::Regtest => Network::Regtest,
    }
}

/// Chain adapter for a Bitcoin-style ledger.
pub struct UtxoAdapter {
    config: UtxoLedgerConfig,
    network: Network,
    node: Arc<dyn UtxoNode>,
    keys: KeyManager,
    fees: UtxoFeeEstimator,
    signer: P2wpkhSigner,
    locks: AddressLocks,
    /// Sending address → outpoints spent by our own broadcasts.
    reservations: DashMap<String, HashMap<OutPoint, Instant>>,
    sent: IdempotencyLedger<BitcoinTransaction>,
}

impl UtxoAdapter {
    pub fn new(config: UtxoLedgerConfig, node: Arc<dyn UtxoNode>, keys: KeyManager) -> Self {
        let network = bitcoin_network(config.network);
        let fees = UtxoFeeEstimator::new(
            config.size_model(),
            config.fallback_fee_rate,
            config.max_fee_rate,
        );

        tracing::info!(
            currency = %config.currency,
            network = %config.network,
            finality = config.finality_confirmations,
            dust = config.dust_threshold,
            "UTXO adapter initialized"
        );
        if config.explorer_base().is_none() {
            tracing::warn!(
                currency = %config.currency,
                network = %config.network,
                "No explorer configured, transaction links will be empty"
            );
        }

        Self {
            network,
            node,
            keys,
            fees,
            signer: P2wpkhSigner::new(network),
            locks: AddressLocks::new(),
            reservations: DashMap::new(),
            sent: IdempotencyLedger::with_retention(Duration::from_secs(
                config.idempotency_retention_secs,
            )),
            config,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn parse_address(&self, address: &str) -> SettlementResult<Address> {
        Address::from_str(address)
            .map_err(|e| SettlementError::InvalidAddress(format!("{}: {}", address, e)))?
            .require_network(self.network)
            .map_err(|e| SettlementError::InvalidAddress(format!("{}: {}", address, e)))
    }

    fn parse_txid(&self, tx_id: &TxId) -> SettlementResult<Txid> {
        Txid::from_str(tx_id.as_str())
            .map_err(|_| SettlementError::TransactionNotFound(tx_id.to_string()))
    }

    /// Outpoints still listed by the node that we have already spent.
    ///
    /// Drops reservations the node no longer lists or that have expired.
    fn live_reservations(&self, from: &str, listed: &[UnspentOutput]) -> Vec<OutPoint> {
        let ttl = Duration::from_secs(self.config.reservation_ttl_secs);
        let now = Instant::now();
        let live: Vec<OutPoint> = {
            let Some(mut reserved) = self.reservations.get_mut(from) else {
                return Vec::new();
            };
            reserved.retain(|outpoint, reserved_at| {
                now.duration_since(*reserved_at) < ttl
                    && listed.iter().any(|u| &u.outpoint == outpoint)
            });
            reserved.keys().copied().collect()
        };
        self.reservations.remove_if(from, |_, reserved| reserved.is_empty());
        live
    }

    fn reserve(&self, from: &str, tx: &BitcoinTransaction) {
        let now = Instant::now();
        let mut reserved = self.reservations.entry(from.to_string()).or_default();
        for input in &tx.input {
            reserved.insert(input.previous_output, now);
        }
    }

    fn release(&self, from: &str, tx: &BitcoinTransaction) {
        if let Some(mut reserved) = self.reservations.get_mut(from) {
            for input in &tx.input {
                reserved.remove(&input.previous_output);
            }
        }
        self.reservations.remove_if(from, |_, reserved| reserved.is_empty());
    }

    /// Number of outpoints currently reserved for `address`.
    pub fn reserved_count(&self, address: &LedgerAddress) -> usize {
        let Ok(address) = self.canonical_address(address.as_str()) else {
            return 0;
        };
        self.reservations
            .get(address.as_str())
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Number of sending addresses with at least one reserved outpoint.
    pub fn reserved_addresses(&self) -> usize {
        self.reservations.len()
    }

    /// Number of idempotency keys still replayable.
    pub fn recorded_attempts(&self) -> usize {
        self.sent.len()
    }

    /// Spendable outputs of `from`, excluding our own in-flight spends.
    async fn spendable(&self, from: &LedgerAddress) -> SettlementResult<Vec<UnspentOutput>> {
        let listed = self
            .node
            .list_unspent(from, self.config.min_input_confirmations)
            .await?;
        let reserved = self.live_reservations(from.as_str(), &listed);
        Ok(listed
            .into_iter()
            .filter(|u| !reserved.contains(&u.outpoint))
            .collect())
    }

    async fn current_fee_rate(&self) -> SettlementResult<u64> {
        let node_rate = self.node.fee_rate(self.config.fee_conf_target).await?;
        if node_rate.is_none() {
            tracing::debug!(
                fallback = self.config.fallback_fee_rate,
                "Node has no fee estimate, using fallback rate"
            );
        }
        self.fees.resolve_rate(node_rate)
    }

    /// Whether `txid` spends from `address`, making its outputs there change.
    ///
    /// A transaction the node cannot resolve is treated as external.
    async fn spends_from(&self, txid: &Txid, address: &LedgerAddress) -> SettlementResult<bool> {
        Ok(self
            .node
            .transaction(txid)
            .await?
            .map(|info| {
                info.inputs
                    .iter()
                    .any(|input| input.address.as_deref() == Some(address.as_str()))
            })
            .unwrap_or(false))
    }

    /// Resolve a retry of an already-signed transfer.
    async fn replay(&self, tx_id: TxId, signed: &BitcoinTransaction) -> SettlementResult<TxId> {
        let txid = signed.compute_txid();
        if self.node.transaction(&txid).await?.is_some() {
            tracing::info!(tx_id = %tx_id, "Idempotent retry: transaction already known to node");
            return Ok(tx_id);
        }

        tracing::info!(tx_id = %tx_id, "Idempotent retry: rebroadcasting recorded transaction");
        self.node.broadcast(signed).await?;
        metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_REPLAYED);
        Ok(tx_id)
    }

    fn to_transaction(&self, info: UtxoTxInfo, tip: u64) -> Transaction {
        let confirmations = info
            .block_height
            .map(|height| tip.saturating_sub(height))
            .unwrap_or(0);
        let status = if info.block_height.is_some()
            && confirmations >= self.config.finality_confirmations
        {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Pending
        };

        let from = info.inputs.iter().find_map(|i| i.address.clone());
        let recipient = info
            .outputs
            .iter()
            .find(|o| o.address.is_some() && o.address != from)
            .or_else(|| info.outputs.first());

        let tx_id = TxId::new(info.txid.to_string());
        Transaction {
            explorer_url: self.explorer_url(&tx_id),
            id: tx_id,
            block_hash: info.block_hash,
            block_number: info.block_height,
            from: from.map(LedgerAddress::from),
            to: recipient.and_then(|o| o.address.clone()).map(LedgerAddress::from),
            amount: recipient.map(|o| o.amount as Subunits).unwrap_or(0),
            fee: info.fee.map(|f| f as Subunits),
            confirmations,
            status,
            timestamp: info.block_time,
            currency: self.config.currency.clone(),
        }
    }
}

#[async_trait]
impl ChainAdapter for UtxoAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn currency(&self) -> &str {
        &self.config.currency
    }

    fn units(&self) -> UnitConverter {
        UnitConverter::BITCOIN
    }

    fn finality_threshold(&self) -> u64 {
        self.config.finality_confirmations
    }

    fn canonical_address(&self, address: &str) -> SettlementResult<LedgerAddress> {
        Ok(LedgerAddress::new(self.parse_address(address)?.to_string()))
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
        Ok(LedgerAddress::new(self.signer.address_for(key)?.to_string()))
    }

    fn encode_key(&self, key: &KeyMaterial) -> SettlementResult<String> {
        self.signer.to_wif(key)
    }

    fn decode_key(&self, encoded: &str) -> SettlementResult<KeyMaterial> {
        self.signer.from_wif(encoded)
    }

    async fn generate_address(&self) -> SettlementResult<LedgerAddress> {
        let address = self
            .keys
            .issue(&self.config.currency, |key| self.address_for_key(key))
            .await?;
        self.node.watch_address(&address, None).await?;
        Ok(address)
    }

    async fn import_key(&self, encoded: &str) -> SettlementResult<LedgerAddress> {
        let key = self.decode_key(encoded)?;
        let address = self
            .keys
            .import(&self.config.currency, key, |k| self.address_for_key(k))
            .await?;
        self.node
            .watch_address(&address, Some(self.config.rescan_birthday))
            .await?;
        Ok(address)
    }

    async fn get_balance(&self, address: &LedgerAddress) -> SettlementResult<Subunits> {
        let address = self.canonical_address(address.as_str())?;
        let unspent = self
            .node
            .list_unspent(&address, self.config.min_input_confirmations)
            .await?;
        Ok(unspent.iter().map(|u| u.amount as Subunits).sum())
    }

    async fn build_and_send(
        &self,
        request: &TransferRequest,
        key: &KeyMaterial,
    ) -> SettlementResult<TxId> {
        let request = &self.canonical_request(request)?;
        let from = self.parse_address(request.from.as_str())?;
        let to = self.parse_address(request.to.as_str())?;
        let amount = u64::try_from(request.amount).map_err(|_| {
            SettlementError::InvalidAmount(format!("{} exceeds the ledger supply", request.amount))
        })?;

        let guard = self.locks.acquire(request.from.as_str()).await;

        if let Some(prior) = self.sent.prior_attempt(request)? {
            drop(guard);
            return self.replay(prior.tx_id, &prior.signed).await;
        }

        let rate = self.current_fee_rate().await?;
        let candidates = self.spendable(&request.from).await?;
        let selection = select_inputs(
            candidates,
            amount,
            &self.fees,
            rate,
            self.config.dust_threshold,
        )?;
        let signed = self.signer.sign(&selection, &from, &to, key)?;
        let txid = signed.compute_txid();
        let tx_id = TxId::new(txid.to_string());

        self.reserve(request.from.as_str(), &signed);
        self.sent.record(request, tx_id.clone(), signed.clone());
        drop(guard);

        tracing::info!(
            currency = %self.config.currency,
            tx_id = %tx_id,
            from = %request.from,
            to = %request.to,
            amount = amount,
            inputs = selection.inputs.len(),
            change = selection.change.unwrap_or(0),
            fee = selection.fee,
            rate = rate,
            "Broadcasting transaction"
        );

        match self.node.broadcast(&signed).await {
            Ok(_) => {
                metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_ACCEPTED);
                metrics::record_fee(&self.config.currency, selection.fee as u128);
                Ok(tx_id)
            }
            Err(SettlementError::BroadcastRejected(reason)) => {
                tracing::warn!(tx_id = %tx_id, reason = %reason, "Broadcast rejected");
                self.release(request.from.as_str(), &signed);
                if let Some(key) = request.idempotency_key.as_deref() {
                    self.sent.forget(key);
                }
                metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_REJECTED);
                Err(SettlementError::BroadcastRejected(reason))
            }
            Err(e) => {
                tracing::warn!(tx_id = %tx_id, error = %e, "Broadcast outcome unknown");
                metrics::record_broadcast(&self.config.currency, metrics::OUTCOME_UNKNOWN);
                Err(e)
            }
        }
    }

    async fn estimate_fee(
        &self,
        from: &LedgerAddress,
        to: &LedgerAddress,
        amount: Subunits,
    ) -> SettlementResult<FeeQuote> {
        let from = self.canonical_address(from.as_str())?;
        self.canonical_address(to.as_str())?;
        let amount = u64::try_from(amount)
            .map_err(|_| SettlementError::InvalidAmount(format!("{} out of range", amount)))?;

        let rate = self.current_fee_rate().await?;
        let candidates = self.spendable(&from).await?;
        let quote = match select_inputs(candidates, amount, &self.fees, rate, self.config.dust_threshold) {
            Ok(selection) => {
                let mut quote = self.fees.quote(
                    &self.config.currency,
                    selection.inputs.len(),
                    selection.output_count(),
                    rate,
                );
                // Dust folded into the fee is part of what the sender pays.
                quote.fee = selection.fee as Subunits;
                quote
            }
            Err(SettlementError::InsufficientBalance { .. }) => {
                self.fees.quote(&self.config.currency, 1, 2, rate)
            }
            Err(e) => return Err(e),
        };
        Ok(quote)
    }

    async fn get_transaction(&self, tx_id: &TxId) -> SettlementResult<Transaction> {
        let txid = self.parse_txid(tx_id)?;
        let info = self
            .node
            .transaction(&txid)
            .await?
            .ok_or_else(|| SettlementError::TransactionNotFound(tx_id.to_string()))?;
        let tip = self.node.tip_height().await?;
        Ok(self.to_transaction(info, tip))
    }

    async fn get_confirmations(&self, tx_id: &TxId) -> SettlementResult<u64> {
        Ok(self.get_transaction(tx_id).await?.confirmations)
    }

    async fn is_healthy(&self) -> bool {
        let healthy = self.node.tip_height().await.is_ok();
        metrics::record_node_health(&self.config.name, healthy);
        healthy
    }

    async fn incoming_payments(
        &self,
        address: &LedgerAddress,
        from_height: Option<u64>,
    ) -> SettlementResult<IncomingScan> {
        let address = self.canonical_address(address.as_str())?;
        let tip = self.node.tip_height().await?;
        let from = from_height.unwrap_or(tip);
        let listed = self.node.list_unspent(&address, 0).await?;

        let mut by_tx: BTreeMap<Txid, (u64, Option<u64>)> = BTreeMap::new();
        for output in listed {
            // The node counts the including block as the first confirmation.
            let height = (output.confirmations > 0)
                .then(|| (tip + 1).saturating_sub(output.confirmations));
            if matches!(height, Some(h) if h < from) {
                continue;
            }
            let entry = by_tx.entry(output.outpoint.txid).or_insert((0, height));
            entry.0 = entry.0.saturating_add(output.amount);
        }

        let mut payments = Vec::with_capacity(by_tx.len());
        for (txid, (amount, block_number)) in by_tx {
            if self.spends_from(&txid, &address).await? {
                continue;
            }
            let mut payment = IncomingPayment {
                tx_id: TxId::new(txid.to_string()),
                address: address.clone(),
                amount: amount as Subunits,
                block_number,
                confirmations: 0,
            };
            payment.refresh(tip);
            payments.push(payment);
        }

        Ok(IncomingScan {
            tip,
            scanned_to: tip,
            payments,
        })
    }
}

impl std::fmt::Debug for UtxoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtxoAdapter")
            .field("currency", &self.config.currency)
            .field("network", &self.network)
            .finish()
    }
}
