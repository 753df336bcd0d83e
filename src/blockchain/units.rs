//! Exact conversion between human-denominated amounts and ledger subunits.
//!
//! All arithmetic is integer based: a decimal amount is split into its
//! mantissa and scale, then scaled up by a power of ten. Amounts with more
//! fractional digits than the ledger supports are rejected, never rounded.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::blockchain::types::{SettlementError, SettlementResult, Subunits};

/// Largest scale a `Decimal` can carry.
const MAX_DECIMALS: u32 = 28;

/// Converter for one ledger's unit system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitConverter {
    decimals: u32,
}

impl UnitConverter {
    /// 1 BTC = 10^8 satoshi.
    pub const BITCOIN: UnitConverter = UnitConverter { decimals: 8 };
    /// 1 ETH = 10^18 wei.
    pub const ETHER: UnitConverter = UnitConverter { decimals: 18 };

    pub fn new(decimals: u32) -> SettlementResult<Self> {
        if decimals > MAX_DECIMALS {
            return Err(SettlementError::InvalidAmount(format!(
                "unit precision {} exceeds {} decimals",
                decimals, MAX_DECIMALS
            )));
        }
        Ok(Self { decimals })
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Convert a whole-unit decimal amount into subunits.
    pub fn to_subunits(&self, amount: Decimal) -> SettlementResult<Subunits> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(SettlementError::InvalidAmount(format!(
                "negative amount {}",
                amount
            )));
        }

        let normalized = amount.normalize();
        let scale = normalized.scale();
        if scale > self.decimals {
            return Err(SettlementError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                amount, self.decimals
            )));
        }

        let mantissa = normalized.mantissa().unsigned_abs();
        let factor = 10u128
            .checked_pow(self.decimals - scale)
            .ok_or_else(|| SettlementError::InvalidAmount(format!("{} out of range", amount)))?;

        mantissa
            .checked_mul(factor)
            .ok_or_else(|| SettlementError::InvalidAmount(format!("{} out of range", amount)))
    }

    /// Convert subunits back into a whole-unit decimal amount.
    pub fn from_subunits(&self, subunits: Subunits) -> SettlementResult<Decimal> {
        let signed = i128::try_from(subunits).map_err(|_| {
            SettlementError::InvalidAmount(format!("{} subunits out of range", subunits))
        })?;
        Decimal::try_from_i128_with_scale(signed, self.decimals)
            .map(|d| d.normalize())
            .map_err(|_| {
                SettlementError::InvalidAmount(format!(
                    "{} subunits not representable as a decimal",
                    subunits
                ))
            })
    }

    /// Parse a decimal string ("0.00000001", "1e-8") into subunits.
    pub fn parse(&self, amount: &str) -> SettlementResult<Subunits> {
        let trimmed = amount.trim();
        let decimal = if trimmed.contains(['e', 'E']) {
            Decimal::from_scientific(trimmed)
        } else {
            Decimal::from_str(trimmed)
        }
        .map_err(|e| SettlementError::InvalidAmount(format!("'{}': {}", amount, e)))?;
        self.to_subunits(decimal)
    }

    /// Render subunits as a plain decimal string.
    pub fn format(&self, subunits: Subunits) -> String {
        match self.from_subunits(subunits) {
            Ok(d) => d.to_string(),
            Err(_) => format!("{} subunits", subunits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::*;

    #[test]
    fn test_smallest_bitcoin_unit() {
        let one_sat = Decimal::from_str("0.00000001").unwrap();
        assert_eq!(UnitConverter::BITCOIN.to_subunits(one_sat).unwrap(), 1);
        assert_eq!(UnitConverter::BITCOIN.from_subunits(1).unwrap(), one_sat);
    }

    #[test]
    fn test_round_trip_lossless() {
        let cases = [
            (UnitConverter::BITCOIN, "21000000"),
            (UnitConverter::BITCOIN, "0.1"),
            (UnitConverter::BITCOIN, "20999999.99999999"),
            (UnitConverter::ETHER, "0.000000000000000001"),
            (UnitConverter::ETHER, "1.5"),
            (UnitConverter::ETHER, "123456789.123456789123456789"),
        ];
        for (converter, text) in cases {
            let amount = Decimal::from_str(text).unwrap();
            let subunits = converter.to_subunits(amount).unwrap();
            assert_eq!(converter.from_subunits(subunits).unwrap(), amount.normalize());
        }
    }

    #[test]
    fn test_ether_to_wei() {
        let wei = UnitConverter::ETHER.parse("1.5").unwrap();
        assert_eq!(wei, 1_500_000_000_000_000_000);
    }

    #[test]
    fn test_trailing_zeros_accepted() {
        // 9 fractional digits, but the last one is zero.
        assert_eq!(UnitConverter::BITCOIN.parse("0.000000010").unwrap(), 1);
    }

    #[test]
    fn test_excess_precision_rejected() {
        let result = UnitConverter::BITCOIN.parse("0.000000001");
        assert!(matches!(result, Err(SettlementError::InvalidAmount(_))));
    }

    #[test]
    fn test_negative_rejected() {
        let result = UnitConverter::BITCOIN.parse("-1");
        assert!(matches!(result, Err(SettlementError::InvalidAmount(_))));
    }

    #[test]
    fn test_scientific_notation() {
        assert_eq!(UnitConverter::BITCOIN.parse("1e-8").unwrap(), 1);
        assert_eq!(UnitConverter::BITCOIN.parse("2.5E-3").unwrap(), 250_000);
    }

    #[test]
    fn test_format() {
        assert_eq!(UnitConverter::BITCOIN.format(150_000_000), "1.5");
        assert_eq!(UnitConverter::ETHER.format(1), "0.000000000000000001");
    }

    #[test]
    fn test_precision_limit() {
        assert!(UnitConverter::new(29).is_err());
        assert_eq!(UnitConverter::new(6).unwrap().decimals(), 6);
    }
}
