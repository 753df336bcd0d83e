//! Value-transfer signing for account-model ledgers.
//!
//! # Security
//! - A signer is built per transaction from custody key material and dropped
//!   right after signing
//! - Keys are never logged or serialized

use alloy::consensus::transaction::SignerRecoverable;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;

use crate::blockchain::account::node::SignedTransfer;
use crate::blockchain::types::{SettlementError, SettlementResult};
use crate::keys::KeyMaterial;

/// Parameters of a single value transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    pub from: Address,
    pub to: Address,
    pub value: u128,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// Signs legacy (EIP-155) value transfers for one chain.
#[derive(Debug, Clone, Copy)]
pub struct TransferSigner {
    chain_id: u64,
}

impl TransferSigner {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address controlled by `key`.
    pub fn address_for(key: &KeyMaterial) -> SettlementResult<Address> {
        Ok(Self::local_signer(key)?.address())
    }

    /// Sign `params`, refusing if `key` does not control `params.from`.
    ///
    /// The signature is recovered and checked against the sender before the
    /// transfer is returned.
    pub async fn sign(
        &self,
        params: TransferParams,
        key: &KeyMaterial,
    ) -> SettlementResult<SignedTransfer> {
        let signer = Self::local_signer(key)?;
        if signer.address() != params.from {
            return Err(SettlementError::SigningError(format!(
                "key controls {} but transfer is from {}",
                signer.address(),
                params.from
            )));
        }

        let wallet = EthereumWallet::from(signer);
        let request = TransactionRequest::default()
            .with_from(params.from)
            .with_to(params.to)
            .with_value(U256::from(params.value))
            .with_nonce(params.nonce)
            .with_gas_limit(params.gas_limit)
            .with_gas_price(params.gas_price)
            .with_chain_id(self.chain_id);

        let envelope = request
            .build(&wallet)
            .await
            .map_err(|e| SettlementError::SigningError(format!("transaction build: {}", e)))?;

        let recovered = envelope
            .recover_signer()
            .map_err(|e| SettlementError::SigningError(format!("signer recovery: {}", e)))?;
        if recovered != params.from {
            return Err(SettlementError::SigningError(format!(
                "signature recovers to {}, expected {}",
                recovered, params.from
            )));
        }

        Ok(SignedTransfer {
            hash: *envelope.tx_hash(),
            raw: envelope.encoded_2718().into(),
            from: params.from,
            to: params.to,
            value: params.value,
            nonce: params.nonce,
            gas_limit: params.gas_limit,
            gas_price: params.gas_price,
        })
    }

    fn local_signer(key: &KeyMaterial) -> SettlementResult<PrivateKeySigner> {
        PrivateKeySigner::from_bytes(&B256::from(*key.expose()))
            .map_err(|e| SettlementError::SigningError(format!("invalid secp256k1 key: {}", e)))
    }
}
