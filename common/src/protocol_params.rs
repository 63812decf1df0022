//! Ledger protocol parameters used for fees, output minimums and collateral

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{
    asset::Lovelace,
    script::{ExUnits, PlutusVersion},
    utxo::TxOutput,
};

pub type RationalNumber = num_rational::Ratio<u64>;

/// Bytes charged per UTxO entry on top of the serialized output
pub const UTXO_ENTRY_OVERHEAD: u64 = 160;

pub fn rational_number_from_f64(f: f64) -> Result<RationalNumber> {
    RationalNumber::approximate_float_unsigned(f)
        .ok_or_else(|| anyhow!("Cannot convert {f} to Rational"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProtocolParams {
    /// Lovelace per transaction byte
    pub min_fee_a: u64,

    /// Constant fee component
    pub min_fee_b: u64,

    pub max_tx_size: u64,
    pub coins_per_utxo_byte: u64,
    pub price_mem: RationalNumber,
    pub price_step: RationalNumber,
    pub max_tx_ex_units: ExUnits,

    /// Collateral must be at least this percentage of the fee
    pub collateral_percentage: u64,
    pub max_collateral_inputs: u64,

    /// Budget assigned to each redeemer when it is attached
    pub default_redeemer_budget: ExUnits,

    /// Cost model parameters per language, feeding the script data hash
    #[serde(default)]
    pub cost_models: BTreeMap<PlutusVersion, Vec<i64>>,
}

impl Default for ProtocolParams {
    /// Emulator parameters, matching the public testnets
    fn default() -> Self {
        Self {
            min_fee_a: 44,
            min_fee_b: 155_381,
            max_tx_size: 16_384,
            coins_per_utxo_byte: 4_310,
            price_mem: RationalNumber::new(577, 10_000),
            price_step: RationalNumber::new(721, 10_000_000),
            max_tx_ex_units: ExUnits {
                mem: 14_000_000,
                steps: 10_000_000_000,
            },
            collateral_percentage: 150,
            max_collateral_inputs: 3,
            default_redeemer_budget: ExUnits {
                mem: 1_000_000,
                steps: 500_000_000,
            },
            cost_models: BTreeMap::new(),
        }
    }
}

impl ProtocolParams {
    /// Size-dependent part of the minimum fee
    pub fn size_fee(&self, size: u64) -> Lovelace {
        self.min_fee_a.saturating_mul(size).saturating_add(self.min_fee_b)
    }

    /// Price of the given execution budgets, rounded up
    pub fn script_fee<'a>(&self, budgets: impl IntoIterator<Item = &'a ExUnits>) -> Lovelace {
        let total = budgets.into_iter().fold(RationalNumber::from_integer(0), |acc, units| {
            acc + self.price_mem * units.mem + self.price_step * units.steps
        });
        total.ceil().to_integer()
    }

    /// `min_fee_a * size + min_fee_b + execution prices`
    pub fn min_fee<'a>(&self, size: u64, budgets: impl IntoIterator<Item = &'a ExUnits>) -> Lovelace {
        self.size_fee(size).saturating_add(self.script_fee(budgets))
    }

    /// Smallest lovelace quantity the output may carry. The lovelace field's
    /// own width feeds into the size, so iterate until it settles.
    pub fn min_ada_for_output(&self, output: &TxOutput) -> Lovelace {
        let mut sized = output.clone();
        loop {
            let min = (UTXO_ENTRY_OVERHEAD + sized.encoded_size() as u64)
                .saturating_mul(self.coins_per_utxo_byte);
            if sized.value.lovelace() >= min {
                return min;
            }
            sized.value.set_lovelace(min);
        }
    }

    /// Collateral needed to cover a transaction with the given fee
    pub fn collateral_required(&self, fee: Lovelace) -> Lovelace {
        (RationalNumber::from_integer(fee) * self.collateral_percentage / 100)
            .ceil()
            .to_integer()
    }
}

/// Mapping between slots and POSIX milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub zero_time: u64,
    pub zero_slot: u64,
    pub slot_length: u64,
}

impl Default for SlotConfig {
    /// Preview testnet origin, also used by the emulator
    fn default() -> Self {
        Self {
            zero_time: 1_666_656_000_000,
            zero_slot: 0,
            slot_length: 1000,
        }
    }
}

impl SlotConfig {
    /// Slot containing the given time; times before the origin map to the zero slot
    pub fn slot_at(&self, posix_ms: u64) -> u64 {
        self.zero_slot + posix_ms.saturating_sub(self.zero_time) / self.slot_length
    }

    /// Start time of a slot
    pub fn time_of(&self, slot: u64) -> u64 {
        self.zero_time + slot.saturating_sub(self.zero_slot) * self.slot_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::{Address, NetworkId},
        asset::Value,
        hash::Hash,
    };

    #[test]
    fn fee_is_linear_in_size() {
        let params = ProtocolParams::default();
        assert_eq!(params.min_fee(0, &[]), 155_381);
        assert_eq!(params.min_fee(200, &[]), 155_381 + 44 * 200);
    }

    #[test]
    fn script_fee_rounds_up() {
        let params = ProtocolParams::default();
        let units = ExUnits { mem: 1, steps: 1 };
        // 0.0577 + 0.0000721 rounds up to one lovelace
        assert_eq!(params.script_fee(&[units]), 1);
        assert_eq!(params.script_fee(&[params.default_redeemer_budget]), 57_700 + 36_050);
    }

    #[test]
    fn min_ada_for_simple_output() {
        let params = ProtocolParams::default();
        let output = TxOutput::new(
            Address::from_key_hash(NetworkId::Testnet, Hash::new([1; 28])),
            Value::from_lovelace(0),
        );
        // Settles with a 5 byte lovelace field: 160 + 39 bytes
        assert_eq!(params.min_ada_for_output(&output), 199 * 4_310);
    }

    #[test]
    fn collateral_is_percentage_of_fee() {
        let params = ProtocolParams::default();
        assert_eq!(params.collateral_required(200_001), 300_002);
        assert_eq!(params.collateral_required(3), 5);
    }

    #[test]
    fn slots_and_times_agree() {
        let slots = SlotConfig::default();
        let slot = slots.slot_at(1_666_656_000_000 + 12_345);
        assert_eq!(slot, 12);
        assert_eq!(slots.time_of(slot), 1_666_656_012_000);
    }

    #[test]
    fn float_prices_convert() {
        assert_eq!(rational_number_from_f64(0.75).unwrap(), RationalNumber::new(3, 4));
        assert_eq!(rational_number_from_f64(0.5).unwrap(), RationalNumber::new(1, 2));
        assert!(rational_number_from_f64(-1.0).is_err());
    }
}
