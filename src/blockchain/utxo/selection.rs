//! Largest-first input selection with two-pass fee estimation.
//!
//! Pass one accumulates outputs (largest first, older first on ties) until
//! they cover the amount plus the fee for the candidate input count. Pass
//! two re-derives the fee for the fixed input count and decides whether the
//! remainder becomes a change output or is folded into the fee. Either way
//! `sum(inputs) == amount + change + fee` holds exactly.

use std::cmp::Ordering;

use crate::blockchain::fee::UtxoFeeEstimator;
use crate::blockchain::types::{SettlementError, SettlementResult};
use crate::blockchain::utxo::node::UnspentOutput;

/// Result of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<UnspentOutput>,
    /// Value of the recipient output.
    pub amount: u64,
    /// Change back to the sender; `None` when folded into the fee.
    pub change: Option<u64>,
    pub fee: u64,
}

impl Selection {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.amount).sum()
    }

    pub fn output_count(&self) -> usize {
        if self.change.is_some() {
            2
        } else {
            1
        }
    }
}

/// Amount descending, then confirmations descending.
fn selection_order(a: &UnspentOutput, b: &UnspentOutput) -> Ordering {
    b.amount
        .cmp(&a.amount)
        .then_with(|| b.confirmations.cmp(&a.confirmations))
}

/// Choose inputs for sending `amount` at `rate` sat/vB.
pub fn select_inputs(
    mut candidates: Vec<UnspentOutput>,
    amount: u64,
    fees: &UtxoFeeEstimator,
    rate: u64,
    dust_threshold: u64,
) -> SettlementResult<Selection> {
    if amount == 0 {
        return Err(SettlementError::InvalidAmount("amount must be > 0".to_string()));
    }
    if amount < dust_threshold {
        return Err(SettlementError::InvalidAmount(format!(
            "amount {} is below the dust threshold {}",
            amount, dust_threshold
        )));
    }

    candidates.sort_by(selection_order);

    // Pass 1: smallest prefix that covers amount + fee without change.
    let mut accumulated: u64 = 0;
    let mut count = 0;
    let mut covered = false;
    for candidate in &candidates {
        accumulated = accumulated.saturating_add(candidate.amount);
        count += 1;
        if accumulated >= amount.saturating_add(fees.fee_for(count, 1, rate)) {
            covered = true;
            break;
        }
    }

    if !covered {
        let available: u64 = candidates.iter().map(|u| u.amount).sum();
        let required = amount.saturating_add(fees.fee_for(candidates.len().max(1), 1, rate));
        return Err(SettlementError::InsufficientBalance {
            available: available as u128,
            required: required as u128,
        });
    }

    candidates.truncate(count);

    // Pass 2: fee for the fixed input count, with and without change.
    let fee_with_change = fees.fee_for(count, 2, rate);
    let (change, fee) = match accumulated.checked_sub(amount.saturating_add(fee_with_change)) {
        Some(remainder) if remainder > 0 && remainder >= dust_threshold => {
            (Some(remainder), fee_with_change)
        }
        _ => (None, accumulated - amount),
    };

    Ok(Selection {
        inputs: candidates,
        amount,
        change,
        fee,
    })
}
