//! The ledger-agnostic adapter contract.
//!
//! Every supported ledger implements `ChainAdapter` once. Callers only ever
//! see typed `SettlementError`s; node payloads are translated underneath.

use async_trait::async_trait;

use crate::blockchain::fee::FeeQuote;
use crate::blockchain::types::{
    IncomingScan, LedgerAddress, SettlementResult, Subunits, Transaction, TransferRequest, TxId,
};
use crate::blockchain::units::UnitConverter;
use crate::keys::{KeyManager, KeyMaterial};

/// Uniform interface over one ledger.
///
/// All methods are safe to call concurrently. Writes to the same sending
/// address are serialized internally.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Human-readable ledger name, e.g. "Bitcoin".
    fn name(&self) -> &str;

    /// Currency code, e.g. "BTC".
    fn currency(&self) -> &str;

    fn units(&self) -> UnitConverter;

    /// Confirmations at which a transaction is treated as final.
    fn finality_threshold(&self) -> u64;

    /// The one spelling of `address` this adapter keys custody, locks and
    /// reservations by. Rejects malformed or wrong-network addresses.
    /// Never touches the network.
    fn canonical_address(&self, address: &str) -> SettlementResult<LedgerAddress>;

    /// Format and checksum check. Never touches the network.
    fn validate_address(&self, address: &str) -> bool {
        self.canonical_address(address).is_ok()
    }

    /// `request` with both endpoints in canonical form.
    fn canonical_request(&self, request: &TransferRequest) -> SettlementResult<TransferRequest> {
        Ok(TransferRequest {
            from: self.canonical_address(request.from.as_str())?,
            to: self.canonical_address(request.to.as_str())?,
            amount: request.amount,
            idempotency_key: request.idempotency_key.clone(),
        })
    }

    /// Explorer link for a transaction. Pure formatting.
    fn explorer_url(&self, tx_id: &TxId) -> String;

    /// Custody this adapter issues and signs with.
    fn key_manager(&self) -> &KeyManager;

    /// Receiving address controlled by `key`.
    fn address_for_key(&self, key: &KeyMaterial) -> SettlementResult<LedgerAddress>;

    /// Ledger-native export encoding of a key.
    fn encode_key(&self, key: &KeyMaterial) -> SettlementResult<String>;

    /// Inverse of `encode_key`.
    fn decode_key(&self, encoded: &str) -> SettlementResult<KeyMaterial>;

    async fn get_balance(&self, address: &LedgerAddress) -> SettlementResult<Subunits>;

    /// Construct, sign and broadcast a transfer.
    ///
    /// Retrying with the same idempotency key never produces a second,
    /// conflicting transaction.
    async fn build_and_send(
        &self,
        request: &TransferRequest,
        key: &KeyMaterial,
    ) -> SettlementResult<TxId>;

    /// Advisory fee for a prospective transfer.
    async fn estimate_fee(
        &self,
        from: &LedgerAddress,
        to: &LedgerAddress,
        amount: Subunits,
    ) -> SettlementResult<FeeQuote>;

    async fn get_transaction(&self, tx_id: &TxId) -> SettlementResult<Transaction>;

    /// Chain tip height minus inclusion height; 0 while unconfirmed.
    async fn get_confirmations(&self, tx_id: &TxId) -> SettlementResult<u64>;

    /// True if the node answers a tip-height query.
    async fn is_healthy(&self) -> bool;

    /// Payments into `address` included at or above `from_height`, plus the
    /// unconfirmed ones the node can see. `None` starts at the current tip.
    ///
    /// Each call may cover only part of the range; the scan reports how far
    /// it got so the caller can continue from `scanned_to + 1`.
    async fn incoming_payments(
        &self,
        address: &LedgerAddress,
        from_height: Option<u64>,
    ) -> SettlementResult<IncomingScan>;

    /// Fresh receiving address with its key already persisted.
    async fn generate_address(&self) -> SettlementResult<LedgerAddress> {
        self.key_manager()
            .issue(self.currency(), |key| self.address_for_key(key))
            .await
    }

    /// Pay out from an address held in custody.
    async fn send(&self, request: &TransferRequest) -> SettlementResult<TxId> {
        let request = self.canonical_request(request)?;
        let key = self
            .key_manager()
            .signing_key(self.currency(), &request.from)
            .await?;
        self.build_and_send(&request, &key).await
    }

    async fn export_key(&self, address: &LedgerAddress) -> SettlementResult<String> {
        let address = self.canonical_address(address.as_str())?;
        self.key_manager()
            .export_key(self.currency(), &address, |key| self.encode_key(key))
            .await
    }

    async fn import_key(&self, encoded: &str) -> SettlementResult<LedgerAddress> {
        let key = self.decode_key(encoded)?;
        self.key_manager()
            .import(self.currency(), key, |k| self.address_for_key(k))
            .await
    }

    async fn retire_address(&self, address: &LedgerAddress) -> SettlementResult<()> {
        let address = self.canonical_address(address.as_str())?;
        self.key_manager().retire(self.currency(), &address).await
    }
}
