//! P2WPKH transaction construction and signing.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, Address, Amount, CompressedPublicKey, Network, NetworkKind, PrivateKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Witness,
};

use crate::blockchain::types::{SettlementError, SettlementResult};
use crate::blockchain::utxo::selection::Selection;
use crate::keys::KeyMaterial;

/// Signs spends from native SegWit v0 (P2WPKH) addresses.
#[derive(Debug, Clone)]
pub struct P2wpkhSigner {
    secp: Secp256k1<All>,
    network: Network,
}

impl P2wpkhSigner {
    pub fn new(network: Network) -> Self {
        Self {
            secp: Secp256k1::new(),
            network,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// P2WPKH address controlled by `key`.
    pub fn address_for(&self, key: &KeyMaterial) -> SettlementResult<Address> {
        let public = self.public_key(key)?;
        Ok(Address::p2wpkh(&public, self.network))
    }

    /// WIF encoding for the configured network.
    pub fn to_wif(&self, key: &KeyMaterial) -> SettlementResult<String> {
        Ok(PrivateKey::new(key.secret_key()?, self.network).to_wif())
    }

    /// Decode WIF, rejecting keys for another network or uncompressed keys.
    pub fn from_wif(&self, wif: &str) -> SettlementResult<KeyMaterial> {
        let private = PrivateKey::from_wif(wif.trim())
            .map_err(|e| SettlementError::SigningError(format!("invalid WIF: {}", e)))?;
        if private.network != NetworkKind::from(self.network) {
            return Err(SettlementError::SigningError(
                "WIF key is for a different network".to_string(),
            ));
        }
        if !private.compressed {
            return Err(SettlementError::SigningError(
                "uncompressed keys cannot own P2WPKH outputs".to_string(),
            ));
        }
        KeyMaterial::from_bytes(&private.inner.secret_bytes())
    }

    /// Build and sign a transaction spending `selection` from `from`.
    ///
    /// Output 0 pays the recipient; output 1 (if any) is change to `from`.
    pub fn sign(
        &self,
        selection: &Selection,
        from: &Address,
        to: &Address,
        key: &KeyMaterial,
    ) -> SettlementResult<Transaction> {
        let public = self.public_key(key)?;
        let owned = Address::p2wpkh(&public, self.network);
        if &owned != from {
            return Err(SettlementError::SigningError(format!(
                "key controls {} but inputs belong to {}",
                owned, from
            )));
        }

        let spk: ScriptBuf = from.script_pubkey();

        let input = selection
            .inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            })
            .collect();

        let mut output = vec![TxOut {
            value: Amount::from_sat(selection.amount),
            script_pubkey: to.script_pubkey(),
        }];
        if let Some(change) = selection.change {
            output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: spk.clone(),
            });
        }

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        };

        let secret = key.secret_key()?;
        let mut cache = SighashCache::new(&mut tx);
        for (index, utxo) in selection.inputs.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    index,
                    &spk,
                    Amount::from_sat(utxo.amount),
                    EcdsaSighashType::All,
                )
                .map_err(|e| SettlementError::SigningError(format!("sighash input {}: {}", index, e)))?;

            let message = Message::from_digest(sighash.to_byte_array());
            let signature = ecdsa::Signature {
                signature: self.secp.sign_ecdsa(&message, &secret),
                sighash_type: EcdsaSighashType::All,
            };

            let witness = cache.witness_mut(index).ok_or_else(|| {
                SettlementError::SigningError(format!("input {} out of range", index))
            })?;
            *witness = Witness::p2wpkh(&signature, &public.0);
        }

        Ok(tx)
    }

    fn public_key(&self, key: &KeyMaterial) -> SettlementResult<CompressedPublicKey> {
        let private = PrivateKey::new(key.secret_key()?, self.network);
        CompressedPublicKey::from_private_key(&self.secp, &private)
            .map_err(|e| SettlementError::SigningError(format!("public key: {}", e)))
    }
}
