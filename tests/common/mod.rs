//! Shared in-memory ledger nodes for integration tests.
//!
//! Both fakes enforce the rules a real node would (spent outputs, nonce
//! order) so adapter bugs show up as rejections rather than silently passing.

#![allow(dead_code)]

use alloy::primitives::{Address as EthAddress, Bytes, B256};
use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Address, Network, OutPoint, Transaction as BitcoinTransaction, Txid};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chain_settlement::blockchain::account::{
    AccountAdapter, AccountNode, AccountReceipt, AccountTxInfo, SignedTransfer,
};
use chain_settlement::blockchain::utxo::{
    TxInputInfo, TxOutputInfo, UnspentOutput, UtxoAdapter, UtxoNode, UtxoTxInfo,
};
use chain_settlement::config::{AccountLedgerConfig, NetworkMode, TrackerConfig, UtxoLedgerConfig};
use chain_settlement::{KeyManager, LedgerAddress, SettlementError, SettlementResult};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// UTXO ledger
// ---------------------------------------------------------------------------

struct UtxoTxRecord {
    tx: BitcoinTransaction,
    spent: Vec<UnspentOutput>,
    height: Option<u64>,
}

#[derive(Default)]
struct UtxoState {
    unspent: Vec<UnspentOutput>,
    txs: HashMap<Txid, UtxoTxRecord>,
    tip: u64,
    fee_rate: Option<u64>,
    offline: bool,
    lose_broadcast_response: bool,
    reject_broadcasts: Option<String>,
    broadcasts: Vec<Txid>,
    watched: Vec<(String, Option<u64>)>,
    funding_counter: u64,
}

/// In-memory bitcoind stand-in (regtest addresses).
#[derive(Default)]
pub struct FakeUtxoNode {
    state: Mutex<UtxoState>,
    calls: AtomicUsize,
}

impl FakeUtxoNode {
    pub fn new() -> Arc<Self> {
        let node = Self::default();
        {
            let mut state = node.state.lock().unwrap();
            state.tip = 100;
            state.fee_rate = Some(2);
        }
        Arc::new(node)
    }

    /// Credit `address` with a new output that already has `confirmations`.
    pub fn fund(&self, address: &LedgerAddress, amount: u64, confirmations: u64) -> OutPoint {
        let mut state = self.state.lock().unwrap();
        state.funding_counter += 1;
        let mut bytes = [0xFFu8; 32];
        bytes[..8].copy_from_slice(&state.funding_counter.to_le_bytes());
        let outpoint = OutPoint::new(Txid::from_byte_array(bytes), 0);
        state.unspent.push(UnspentOutput {
            outpoint,
            address: address.clone(),
            amount,
            confirmations,
        });
        outpoint
    }

    /// Mine `blocks` blocks, including every mempool transaction in the first.
    pub fn mine(&self, blocks: u64) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..blocks {
            state.tip += 1;
            let tip = state.tip;
            for record in state.txs.values_mut() {
                if record.height.is_none() {
                    record.height = Some(tip);
                }
            }
            for utxo in state.unspent.iter_mut() {
                utxo.confirmations += 1;
            }
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn set_fee_rate(&self, rate: Option<u64>) {
        self.state.lock().unwrap().fee_rate = rate;
    }

    /// Accept the next broadcasts but answer as if the connection dropped.
    pub fn lose_broadcast_responses(&self, lose: bool) {
        self.state.lock().unwrap().lose_broadcast_response = lose;
    }

    pub fn reject_broadcasts(&self, reason: Option<&str>) {
        self.state.lock().unwrap().reject_broadcasts = reason.map(str::to_string);
    }

    /// Every accepted broadcast, including repeats of a known transaction.
    pub fn broadcasts(&self) -> Vec<Txid> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// Distinct transactions the node holds.
    pub fn transaction_count(&self) -> usize {
        self.state.lock().unwrap().txs.len()
    }

    pub fn signed_transaction(&self, txid: &Txid) -> Option<BitcoinTransaction> {
        self.state.lock().unwrap().txs.get(txid).map(|r| r.tx.clone())
    }

    /// Values of the outputs a known transaction spent.
    pub fn spent_values(&self, txid: &Txid) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(txid)
            .map(|r| r.spent.iter().map(|u| u.amount).collect())
            .unwrap_or_default()
    }

    /// (address, rescan start) of every watch request.
    pub fn watched(&self) -> Vec<(String, Option<u64>)> {
        self.state.lock().unwrap().watched.clone()
    }

    /// Number of node calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> SettlementResult<std::sync::MutexGuard<'_, UtxoState>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(SettlementError::NetworkUnavailable("fake node offline".to_string()));
        }
        Ok(state)
    }
}

fn output_address(script: &bitcoin::Script) -> Option<String> {
    Address::from_script(script, Network::Regtest)
        .ok()
        .map(|a| a.to_string())
}

#[async_trait]
impl UtxoNode for FakeUtxoNode {
    async fn list_unspent(
        &self,
        address: &LedgerAddress,
        min_confirmations: u64,
    ) -> SettlementResult<Vec<UnspentOutput>> {
        let state = self.enter()?;
        Ok(state
            .unspent
            .iter()
            .filter(|u| &u.address == address && u.confirmations >= min_confirmations)
            .cloned()
            .collect())
    }

    async fn tip_height(&self) -> SettlementResult<u64> {
        Ok(self.enter()?.tip)
    }

    async fn transaction(&self, txid: &Txid) -> SettlementResult<Option<UtxoTxInfo>> {
        let state = self.enter()?;
        let Some(record) = state.txs.get(txid) else {
            return Ok(None);
        };
        let outputs: Vec<TxOutputInfo> = record
            .tx
            .output
            .iter()
            .map(|o| TxOutputInfo {
                address: output_address(&o.script_pubkey),
                amount: o.value.to_sat(),
            })
            .collect();
        let input_total: u64 = record.spent.iter().map(|u| u.amount).sum();
        let output_total: u64 = outputs.iter().map(|o| o.amount).sum();
        Ok(Some(UtxoTxInfo {
            txid: *txid,
            block_hash: record.height.map(|h| format!("{:064x}", h)),
            block_height: record.height,
            block_time: record.height.map(|h| 1_700_000_000 + h * 600),
            inputs: record
                .spent
                .iter()
                .map(|u| TxInputInfo {
                    address: Some(u.address.to_string()),
                    amount: Some(u.amount),
                })
                .collect(),
            outputs,
            fee: Some(input_total - output_total),
        }))
    }

    async fn fee_rate(&self, _conf_target: u16) -> SettlementResult<Option<u64>> {
        Ok(self.enter()?.fee_rate)
    }

    async fn broadcast(&self, tx: &BitcoinTransaction) -> SettlementResult<Txid> {
        let mut state = self.enter()?;
        let txid = tx.compute_txid();

        if state.txs.contains_key(&txid) {
            state.broadcasts.push(txid);
            return Ok(txid);
        }
        if let Some(reason) = state.reject_broadcasts.clone() {
            return Err(SettlementError::BroadcastRejected(reason));
        }

        let mut spent = Vec::new();
        for input in &tx.input {
            match state.unspent.iter().position(|u| u.outpoint == input.previous_output) {
                Some(index) => spent.push(state.unspent.remove(index)),
                None => {
                    // Put back what this transaction already took.
                    state.unspent.extend(spent);
                    return Err(SettlementError::BroadcastRejected(
                        "bad-txns-inputs-missingorspent".to_string(),
                    ));
                }
            }
        }

        let input_total: u64 = spent.iter().map(|u| u.amount).sum();
        let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        assert!(input_total >= output_total, "transaction creates value");

        for (vout, output) in tx.output.iter().enumerate() {
            if let Some(address) = output_address(&output.script_pubkey) {
                state.unspent.push(UnspentOutput {
                    outpoint: OutPoint::new(txid, vout as u32),
                    address: LedgerAddress::new(address),
                    amount: output.value.to_sat(),
                    confirmations: 0,
                });
            }
        }

        state.txs.insert(
            txid,
            UtxoTxRecord {
                tx: tx.clone(),
                spent,
                height: None,
            },
        );
        state.broadcasts.push(txid);

        if state.lose_broadcast_response {
            return Err(SettlementError::NetworkUnavailable(
                "connection reset during sendrawtransaction".to_string(),
            ));
        }
        Ok(txid)
    }

    async fn watch_address(
        &self,
        address: &LedgerAddress,
        rescan_from: Option<u64>,
    ) -> SettlementResult<()> {
        self.enter()?.watched.push((address.to_string(), rescan_from));
        Ok(())
    }
}

pub const UTXO_EXPLORER: &str = "http://localhost:3002/tx/";

pub fn utxo_config() -> UtxoLedgerConfig {
    UtxoLedgerConfig {
        enabled: true,
        network: NetworkMode::Regtest,
        explorer_url: Some(UTXO_EXPLORER.to_string()),
        rescan_birthday: 1_700_000_000,
        finality_confirmations: 3,
        dust_threshold: 546,
        min_input_confirmations: 1,
        fallback_fee_rate: 1,
        max_fee_rate: 100,
        ..UtxoLedgerConfig::default()
    }
}

pub fn utxo_adapter(node: Arc<FakeUtxoNode>) -> Arc<UtxoAdapter> {
    Arc::new(UtxoAdapter::new(utxo_config(), node, KeyManager::in_memory()))
}

pub fn parse_txid(id: &chain_settlement::TxId) -> Txid {
    Txid::from_str(id.as_str()).unwrap()
}

// ---------------------------------------------------------------------------
// Account ledger
// ---------------------------------------------------------------------------

pub const GAS_PRICE: u128 = 10_000_000_000;
pub const CHAIN_ID: u64 = 31_337;

struct AccountTxRecord {
    transfer: SignedTransfer,
    block: Option<u64>,
}

#[derive(Default)]
struct AccountState {
    balances: HashMap<EthAddress, u128>,
    next_nonce: HashMap<EthAddress, u64>,
    txs: HashMap<B256, AccountTxRecord>,
    failing: HashSet<B256>,
    accepted: Vec<(EthAddress, u64)>,
    deposits: u64,
    block: u64,
    gas_price: u128,
    chain_id: u64,
    offline: bool,
    lose_broadcast_response: bool,
}

/// In-memory JSON-RPC node stand-in with mempool nonce semantics.
#[derive(Default)]
pub struct FakeAccountNode {
    state: Mutex<AccountState>,
}

impl FakeAccountNode {
    pub fn new() -> Arc<Self> {
        let node = Self::default();
        {
            let mut state = node.state.lock().unwrap();
            state.block = 1_000;
            state.gas_price = GAS_PRICE;
            state.chain_id = CHAIN_ID;
        }
        Arc::new(node)
    }

    pub fn fund(&self, address: &LedgerAddress, wei: u128) {
        let address = EthAddress::from_str(address.as_str()).unwrap();
        *self.state.lock().unwrap().balances.entry(address).or_default() += wei;
    }

    /// Pretend `address` already sent `nonce` transactions.
    pub fn set_nonce(&self, address: &LedgerAddress, nonce: u64) {
        let address = EthAddress::from_str(address.as_str()).unwrap();
        self.state.lock().unwrap().next_nonce.insert(address, nonce);
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.state.lock().unwrap().gas_price = wei;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn lose_broadcast_responses(&self, lose: bool) {
        self.state.lock().unwrap().lose_broadcast_response = lose;
    }

    /// Credit `to` from an outside account through a pending transaction
    /// that the next `mine` includes.
    pub fn deposit(&self, to: &LedgerAddress, wei: u128) -> B256 {
        let to = EthAddress::from_str(to.as_str()).unwrap();
        let mut state = self.state.lock().unwrap();
        state.deposits += 1;
        let mut bytes = [0xEEu8; 32];
        bytes[..8].copy_from_slice(&state.deposits.to_le_bytes());
        let hash = B256::from(bytes);
        *state.balances.entry(to).or_default() += wei;
        let nonce = state.deposits - 1;
        state.txs.insert(
            hash,
            AccountTxRecord {
                transfer: SignedTransfer {
                    hash,
                    raw: Bytes::new(),
                    from: EthAddress::repeat_byte(0xEE),
                    to,
                    value: wei,
                    nonce,
                    gas_limit: 21_000,
                    gas_price: GAS_PRICE,
                },
                block: None,
            },
        );
        hash
    }

    /// Make the receipt for `hash` report reverted execution.
    pub fn fail_execution(&self, hash: B256) {
        self.state.lock().unwrap().failing.insert(hash);
    }

    /// Include all pending transactions in one new block, then add
    /// `blocks - 1` empty blocks.
    pub fn mine(&self, blocks: u64) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..blocks {
            state.block += 1;
            let block = state.block;
            for record in state.txs.values_mut() {
                if record.block.is_none() {
                    record.block = Some(block);
                }
            }
        }
    }

    /// (sender, nonce) of every transaction the node accepted, in order.
    pub fn accepted(&self) -> Vec<(EthAddress, u64)> {
        self.state.lock().unwrap().accepted.clone()
    }

    pub fn balance_of(&self, address: &LedgerAddress) -> u128 {
        let address = EthAddress::from_str(address.as_str()).unwrap();
        self.state.lock().unwrap().balances.get(&address).copied().unwrap_or(0)
    }

    fn enter(&self) -> SettlementResult<std::sync::MutexGuard<'_, AccountState>> {
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(SettlementError::NetworkUnavailable("fake node offline".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl AccountNode for FakeAccountNode {
    async fn chain_id(&self) -> SettlementResult<u64> {
        Ok(self.enter()?.chain_id)
    }

    async fn balance(&self, address: EthAddress) -> SettlementResult<u128> {
        Ok(self.enter()?.balances.get(&address).copied().unwrap_or(0))
    }

    async fn pending_balance(&self, address: EthAddress) -> SettlementResult<u128> {
        self.balance(address).await
    }

    async fn pending_nonce(&self, address: EthAddress) -> SettlementResult<u64> {
        Ok(self.enter()?.next_nonce.get(&address).copied().unwrap_or(0))
    }

    async fn gas_price(&self) -> SettlementResult<u128> {
        Ok(self.enter()?.gas_price)
    }

    async fn block_number(&self) -> SettlementResult<u64> {
        Ok(self.enter()?.block)
    }

    async fn block_timestamp(&self, number: u64) -> SettlementResult<Option<u64>> {
        let state = self.enter()?;
        Ok((number <= state.block).then(|| 1_700_000_000 + number * 12))
    }

    async fn transaction(&self, hash: B256) -> SettlementResult<Option<AccountTxInfo>> {
        let state = self.enter()?;
        Ok(state.txs.get(&hash).map(|r| AccountTxInfo {
            hash,
            from: r.transfer.from,
            to: Some(r.transfer.to),
            value: r.transfer.value,
            block_number: r.block,
            block_hash: r.block.map(|b| B256::left_padding_from(&b.to_be_bytes())),
        }))
    }

    async fn block_transactions(&self, number: u64) -> SettlementResult<Vec<AccountTxInfo>> {
        let state = self.enter()?;
        let mut included: Vec<AccountTxInfo> = state
            .txs
            .iter()
            .filter(|(_, r)| r.block == Some(number))
            .map(|(hash, r)| AccountTxInfo {
                hash: *hash,
                from: r.transfer.from,
                to: Some(r.transfer.to),
                value: r.transfer.value,
                block_number: r.block,
                block_hash: Some(B256::left_padding_from(&number.to_be_bytes())),
            })
            .collect();
        included.sort_by_key(|tx| tx.hash);
        Ok(included)
    }

    async fn receipt(&self, hash: B256) -> SettlementResult<Option<AccountReceipt>> {
        let state = self.enter()?;
        Ok(state.txs.get(&hash).and_then(|r| {
            let block = r.block?;
            Some(AccountReceipt {
                block_number: block,
                block_hash: Some(B256::left_padding_from(&block.to_be_bytes())),
                success: !state.failing.contains(&hash),
                gas_used: r.transfer.gas_limit,
                effective_gas_price: r.transfer.gas_price,
            })
        }))
    }

    async fn broadcast(&self, transfer: &SignedTransfer) -> SettlementResult<B256> {
        let mut state = self.enter()?;
        if state.txs.contains_key(&transfer.hash) {
            return Ok(transfer.hash);
        }

        let expected = state.next_nonce.get(&transfer.from).copied().unwrap_or(0);
        if transfer.nonce < expected {
            return Err(SettlementError::BroadcastRejected("nonce too low".to_string()));
        }
        if transfer.nonce > expected {
            return Err(SettlementError::BroadcastRejected("nonce gap".to_string()));
        }

        let cost = transfer.value + transfer.max_fee();
        let balance = state.balances.get(&transfer.from).copied().unwrap_or(0);
        if balance < cost {
            return Err(SettlementError::BroadcastRejected(
                "insufficient funds for gas * price + value".to_string(),
            ));
        }

        state.balances.insert(transfer.from, balance - cost);
        *state.balances.entry(transfer.to).or_default() += transfer.value;
        state.next_nonce.insert(transfer.from, expected + 1);
        state.accepted.push((transfer.from, transfer.nonce));
        state.txs.insert(
            transfer.hash,
            AccountTxRecord {
                transfer: transfer.clone(),
                block: None,
            },
        );

        if state.lose_broadcast_response {
            return Err(SettlementError::NetworkUnavailable(
                "request timed out".to_string(),
            ));
        }
        Ok(transfer.hash)
    }
}

pub fn account_config() -> AccountLedgerConfig {
    AccountLedgerConfig {
        enabled: true,
        network: NetworkMode::Test,
        chain_id: CHAIN_ID,
        finality_confirmations: 2,
        gas_price_multiplier: Decimal::ONE,
        max_gas_price_gwei: 100,
        ..AccountLedgerConfig::default()
    }
}

pub fn account_adapter(node: Arc<FakeAccountNode>) -> Arc<AccountAdapter> {
    Arc::new(AccountAdapter::new(account_config(), node, KeyManager::in_memory()))
}

/// Fast tracker settings for paused-clock tests.
pub fn tracker_config() -> TrackerConfig {
    TrackerConfig {
        poll_interval_ms: 1_000,
        inclusion_timeout_secs: 60,
        backoff_base_ms: 500,
        backoff_max_ms: 5_000,
        terminal_retention_secs: 30,
    }
}
