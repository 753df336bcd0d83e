//! Fee estimation policies.
//!
//! # Responsibilities
//! - UTXO ledgers: fee = virtual size (from input/output count) × fee rate
//! - Account ledgers: fee = gas price × fixed transfer gas limit
//! - Apply configured floors, multipliers and ceilings to node quotes
//!
//! # Design Decisions
//! - Estimators are pure policy objects; adapters fetch the live rate from
//!   their node and pass it in, so the same policy serves quotes and builds
//! - Quotes are advisory; the adapter re-derives the fee it signs with

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blockchain::types::{SettlementError, SettlementResult, Subunits};

/// How a fee quote was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeBasis {
    /// `vbytes` × rate (subunits per vbyte).
    VirtualSize { inputs: usize, outputs: usize, vbytes: u64 },
    /// `gas_limit` × rate (subunits per gas).
    Gas { gas_limit: u64 },
}

/// Fee recommendation for a prospective transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub currency: String,
    /// Total fee in subunits.
    pub fee: Subunits,
    /// Rate the fee was computed with.
    pub rate: Subunits,
    pub basis: FeeBasis,
}

/// Serialized-size model for a transaction, in virtual bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeModel {
    pub overhead_vbytes: u64,
    pub input_vbytes: u64,
    pub output_vbytes: u64,
}

impl SizeModel {
    /// Native SegWit (P2WPKH) inputs and outputs.
    pub const P2WPKH: SizeModel = SizeModel {
        overhead_vbytes: 11,
        input_vbytes: 68,
        output_vbytes: 31,
    };

    pub fn vsize(&self, inputs: usize, outputs: usize) -> u64 {
        self.overhead_vbytes
            .saturating_add(self.input_vbytes.saturating_mul(inputs as u64))
            .saturating_add(self.output_vbytes.saturating_mul(outputs as u64))
    }
}

impl Default for SizeModel {
    fn default() -> Self {
        Self::P2WPKH
    }
}

/// Fee policy for unspent-output ledgers.
#[derive(Debug, Clone)]
pub struct UtxoFeeEstimator {
    size: SizeModel,
    fallback_rate: u64,
    max_rate: u64,
}

impl UtxoFeeEstimator {
    pub fn new(size: SizeModel, fallback_rate: u64, max_rate: u64) -> Self {
        Self {
            size,
            fallback_rate,
            max_rate,
        }
    }

    pub fn size_model(&self) -> SizeModel {
        self.size
    }

    /// Pick the effective rate from the node's recommendation.
    ///
    /// Falls back to the configured rate when the node has no estimate yet
    /// (fresh regtest/testnet nodes) and enforces the ceiling.
    pub fn resolve_rate(&self, node_rate: Option<u64>) -> SettlementResult<u64> {
        let rate = node_rate.unwrap_or(self.fallback_rate).max(1);
        if rate > self.max_rate {
            return Err(SettlementError::FeeRateTooHigh {
                current: rate as Subunits,
                max: self.max_rate as Subunits,
            });
        }
        Ok(rate)
    }

    /// Fee for a transaction of the given shape.
    pub fn fee_for(&self, inputs: usize, outputs: usize, rate: u64) -> u64 {
        self.size.vsize(inputs, outputs).saturating_mul(rate)
    }

    pub fn quote(&self, currency: &str, inputs: usize, outputs: usize, rate: u64) -> FeeQuote {
        FeeQuote {
            currency: currency.to_string(),
            fee: self.fee_for(inputs, outputs, rate) as Subunits,
            rate: rate as Subunits,
            basis: FeeBasis::VirtualSize {
                inputs,
                outputs,
                vbytes: self.size.vsize(inputs, outputs),
            },
        }
    }
}

/// Fee policy for account-balance ledgers.
#[derive(Debug, Clone)]
pub struct GasFeeEstimator {
    gas_limit: u64,
    multiplier: Decimal,
    max_gas_price: u128,
}

impl GasFeeEstimator {
    /// `max_gas_price` is in subunits (wei) per gas.
    pub fn new(gas_limit: u64, multiplier: Decimal, max_gas_price: u128) -> Self {
        Self {
            gas_limit,
            multiplier,
            max_gas_price,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Apply the safety multiplier to the node's gas price and enforce the
    /// ceiling. Rounds up so the result never underpays.
    pub fn resolve_gas_price(&self, node_price: u128) -> SettlementResult<u128> {
        let base = Decimal::from_u128(node_price).ok_or_else(|| {
            SettlementError::InvalidAmount(format!("gas price {} out of range", node_price))
        })?;
        let adjusted = base
            .checked_mul(self.multiplier)
            .map(|d| d.ceil())
            .and_then(|d| d.to_u128())
            .ok_or_else(|| {
                SettlementError::InvalidAmount(format!("gas price {} out of range", node_price))
            })?;

        if adjusted > self.max_gas_price {
            return Err(SettlementError::FeeRateTooHigh {
                current: adjusted,
                max: self.max_gas_price,
            });
        }
        Ok(adjusted)
    }

    pub fn fee_for(&self, gas_price: u128) -> SettlementResult<u128> {
        gas_price
            .checked_mul(self.gas_limit as u128)
            .ok_or_else(|| SettlementError::InvalidAmount("fee overflow".to_string()))
    }

    pub fn quote(&self, currency: &str, gas_price: u128) -> SettlementResult<FeeQuote> {
        Ok(FeeQuote {
            currency: currency.to_string(),
            fee: self.fee_for(gas_price)?,
            rate: gas_price,
            basis: FeeBasis::Gas {
                gas_limit: self.gas_limit,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_vsize_grows_with_inputs() {
        let model = SizeModel::P2WPKH;
        assert_eq!(model.vsize(1, 2), 11 + 68 + 62);
        assert!(model.vsize(3, 2) > model.vsize(2, 2));
    }

    #[test]
    fn test_utxo_fee() {
        let fees = UtxoFeeEstimator::new(SizeModel::P2WPKH, 2, 500);
        let fee = fees.fee_for(2, 2, 10);
        assert_eq!(fee, (11 + 2 * 68 + 2 * 31) * 10);
    }

    #[test]
    fn test_fallback_rate() {
        let fees = UtxoFeeEstimator::new(SizeModel::P2WPKH, 3, 500);
        assert_eq!(fees.resolve_rate(None).unwrap(), 3);
        assert_eq!(fees.resolve_rate(Some(12)).unwrap(), 12);
    }

    #[test]
    fn test_rate_ceiling() {
        let fees = UtxoFeeEstimator::new(SizeModel::P2WPKH, 3, 100);
        let result = fees.resolve_rate(Some(101));
        assert!(matches!(result, Err(SettlementError::FeeRateTooHigh { .. })));
    }

    #[test]
    fn test_gas_fee() {
        let fees = GasFeeEstimator::new(21_000, Decimal::ONE, u128::MAX);
        let price = fees.resolve_gas_price(20_000_000_000).unwrap();
        assert_eq!(fees.fee_for(price).unwrap(), 21_000 * 20_000_000_000);
    }

    #[test]
    fn test_gas_multiplier_rounds_up() {
        let fees = GasFeeEstimator::new(21_000, Decimal::from_str("1.2").unwrap(), u128::MAX);
        assert_eq!(fees.resolve_gas_price(10).unwrap(), 12);
        assert_eq!(fees.resolve_gas_price(11).unwrap(), 14); // 13.2 -> 14
    }

    #[test]
    fn test_gas_ceiling() {
        let fees = GasFeeEstimator::new(21_000, Decimal::ONE, 100);
        let result = fees.resolve_gas_price(101);
        assert!(matches!(result, Err(SettlementError::FeeRateTooHigh { current: 101, max: 100 })));
    }
}
