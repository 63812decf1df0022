//! Greedy largest-first UTxO selection

use std::cmp::Reverse;

use ctf_common::{validation::TxBuildError, AssetId, UTxO, Value};
use tracing::debug;

/// Result of a selection: chosen UTxOs in pick order and what is left over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub chosen: Vec<UTxO>,
    pub change: Value,
}

impl Selection {
    pub fn total(&self) -> Value {
        Value::sum(self.chosen.iter().map(|utxo| &utxo.output.value))
    }
}

/// Choose UTxOs from `available` covering `required`.
///
/// Native assets are covered first, one asset class at a time, taking the
/// largest holdings of that asset. Lovelace is covered last: UTxOs holding
/// only lovelace are taken before token-bearing ones, largest first. Ties
/// break on the UTxO identifier, so the result does not depend on the order
/// of `available`.
pub fn select(available: &[UTxO], required: &Value) -> Result<Selection, TxBuildError> {
    let mut candidates: Vec<&UTxO> = available.iter().collect();
    candidates.sort_by_key(|utxo| utxo.id);

    let mut taken = vec![false; candidates.len()];
    let mut chosen = Vec::new();
    let mut total = Value::default();

    let insufficient = || TxBuildError::InsufficientFunds {
        required: required.clone(),
        available: Value::sum(available.iter().map(|utxo| &utxo.output.value)),
    };

    for (asset, needed) in required.native_assets() {
        let mut order: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].output.value.quantity_of(&asset) > 0)
            .collect();
        order.sort_by_key(|&i| Reverse(candidates[i].output.value.quantity_of(&asset)));

        for i in order {
            if total.quantity_of(&asset) >= needed {
                break;
            }
            if !taken[i] {
                taken[i] = true;
                total += &candidates[i].output.value;
                chosen.push(candidates[i].clone());
            }
        }
        if total.quantity_of(&asset) < needed {
            return Err(insufficient());
        }
    }

    let needed = required.lovelace();
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by_key(|&i| {
        let value = &candidates[i].output.value;
        (value.has_native_assets(), Reverse(value.lovelace()))
    });
    for i in order {
        if total.lovelace() >= needed {
            break;
        }
        if !taken[i] {
            taken[i] = true;
            total += &candidates[i].output.value;
            chosen.push(candidates[i].clone());
        }
    }
    if !total.covers(required) {
        return Err(insufficient());
    }

    let change = total.checked_sub(required)?;
    debug!("Selected {} UTxOs covering {required}", chosen.len());
    Ok(Selection { chosen, change })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_common::{Address, AssetName, Hash, NetworkId, PolicyId, TxOutput, UTxOIdentifier};
    use test_case::test_case;

    fn policy() -> PolicyId {
        Hash::new([5; 28])
    }

    fn token() -> AssetName {
        AssetName::from_text("TOKEN").unwrap()
    }

    fn utxo(hash_byte: u8, value: Value) -> UTxO {
        UTxO::new(
            UTxOIdentifier::new(Hash::new([hash_byte; 32]), 0),
            TxOutput::new(Address::from_key_hash(NetworkId::Testnet, Hash::new([1; 28])), value),
        )
    }

    fn ids(selection: &Selection) -> Vec<u8> {
        selection.chosen.iter().map(|utxo| utxo.id.tx_hash[0]).collect()
    }

    #[test]
    fn single_utxo_covers_requirement() {
        let wallet = vec![utxo(1, Value::from_lovelace(100_000_000))];
        let selection = select(&wallet, &Value::from_lovelace(40_000_000)).unwrap();
        assert_eq!(ids(&selection), vec![1]);
        assert_eq!(selection.change, Value::from_lovelace(60_000_000));
    }

    #[test_case(2_000_000, vec![2] ; "largest alone suffices")]
    #[test_case(12_000_000, vec![2, 3] ; "two largest")]
    #[test_case(17_000_000, vec![2, 3, 1] ; "everything")]
    fn largest_lovelace_first(required: u64, expected: Vec<u8>) {
        let wallet = vec![
            utxo(1, Value::from_lovelace(3_000_000)),
            utxo(2, Value::from_lovelace(9_000_000)),
            utxo(3, Value::from_lovelace(5_000_000)),
        ];
        let selection = select(&wallet, &Value::from_lovelace(required)).unwrap();
        assert_eq!(ids(&selection), expected);
    }

    #[test]
    fn pure_lovelace_preferred_over_token_bearing() {
        let wallet = vec![
            utxo(1, Value::from_lovelace(50_000_000).with_asset(policy(), token(), 1)),
            utxo(2, Value::from_lovelace(4_000_000)),
        ];
        let selection = select(&wallet, &Value::from_lovelace(3_000_000)).unwrap();
        assert_eq!(ids(&selection), vec![2]);

        let selection = select(&wallet, &Value::from_lovelace(10_000_000)).unwrap();
        assert_eq!(ids(&selection), vec![2, 1]);
        assert_eq!(selection.change.quantity_of(&AssetId::Native(policy(), token())), 1);
    }

    #[test]
    fn native_assets_are_covered_first() {
        let wallet = vec![
            utxo(1, Value::from_lovelace(80_000_000)),
            utxo(2, Value::from_lovelace(2_000_000).with_asset(policy(), token(), 5)),
            utxo(3, Value::from_lovelace(2_000_000).with_asset(policy(), token(), 7)),
        ];
        let required = Value::from_lovelace(1_000_000).with_asset(policy(), token(), 6);
        let selection = select(&wallet, &required).unwrap();
        assert_eq!(ids(&selection), vec![3]);
    }

    #[test]
    fn insufficient_funds_reports_totals() {
        let wallet = vec![
            utxo(1, Value::from_lovelace(1_000_000)),
            utxo(2, Value::from_lovelace(2_000_000)),
        ];
        let required = Value::from_lovelace(5_000_000);
        assert_eq!(
            select(&wallet, &required),
            Err(TxBuildError::InsufficientFunds {
                required,
                available: Value::from_lovelace(3_000_000),
            })
        );
    }

    #[test]
    fn missing_asset_is_insufficient() {
        let wallet = vec![utxo(1, Value::from_lovelace(100_000_000))];
        let required = Value::default().with_asset(policy(), token(), 1);
        assert!(matches!(
            select(&wallet, &required),
            Err(TxBuildError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn selection_is_independent_of_input_order() {
        let mut wallet = vec![
            utxo(4, Value::from_lovelace(5_000_000)),
            utxo(2, Value::from_lovelace(5_000_000)),
            utxo(9, Value::from_lovelace(7_000_000)),
            utxo(1, Value::from_lovelace(5_000_000)),
        ];
        let required = Value::from_lovelace(15_000_000);
        let forward = select(&wallet, &required).unwrap();
        wallet.reverse();
        let backward = select(&wallet, &required).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(ids(&forward), vec![9, 1, 2]);
    }

    #[test]
    fn nothing_required_selects_nothing() {
        let wallet = vec![utxo(1, Value::from_lovelace(5_000_000))];
        let selection = select(&wallet, &Value::default()).unwrap();
        assert!(selection.chosen.is_empty());
        assert!(selection.change.is_zero());
    }
}
