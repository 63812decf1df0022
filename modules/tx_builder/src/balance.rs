//! Converging transaction balancer

use ctf_common::{
    asset::{burnt_value, minted_value},
    protocol_params::ProtocolParams,
    validation::TxBuildError,
    Address, Lovelace, Transaction, TxOutput, UTxO, Value,
};
use tracing::{debug, info};

use crate::{draft::TransactionDraft, fee::estimate_fee, selection::select};

/// Rounds of select / estimate before giving up
pub const MAX_BALANCE_ATTEMPTS: usize = 10;

/// Wallet state the balancer draws on
#[derive(Debug, Clone)]
pub struct BalanceContext {
    /// Spendable wallet UTxOs
    pub wallet_utxos: Vec<UTxO>,
    pub change_address: Address,
    pub params: ProtocolParams,
}

/// Balance the draft into a finished transaction.
///
/// Each round selects wallet UTxOs for whatever the explicit inputs and mint
/// do not cover (outputs, burns, the current fee and a minimum change output),
/// then estimates the fee of the resulting transaction. The loop ends when
/// the fee used covers the estimate, so that
/// `inputs + minted = outputs + change + fee + burnt` exactly.
pub fn balance(draft: TransactionDraft, context: &BalanceContext) -> Result<Transaction, TxBuildError> {
    let params = &context.params;
    let mut draft = draft;
    draft.check_mint()?;
    draft.normalise_mint();
    raise_outputs_to_minimum(&mut draft, params);

    let consumed = draft.input_value().checked_add(&minted_value(&draft.mint))?;
    let produced = draft.output_value().checked_add(&burnt_value(&draft.mint))?;

    let available: Vec<UTxO> = context
        .wallet_utxos
        .iter()
        .filter(|utxo| !draft.inputs.contains_key(&utxo.id))
        .cloned()
        .collect();
    let needs_collateral = draft.has_redeemers();

    let mut fee: Lovelace = 0;
    let mut min_change =
        params.min_ada_for_output(&TxOutput::new(context.change_address.clone(), Value::default()));
    let mut last_change = Value::default();

    for attempt in 1..=MAX_BALANCE_ATTEMPTS {
        let target = produced.checked_add(&Value::from_lovelace(fee.saturating_add(min_change)))?;
        let selection = select(&available, &consumed.saturating_deficit(&target))?;

        let change = consumed
            .checked_add(&selection.total())?
            .checked_sub(&produced)?
            .checked_sub(&Value::from_lovelace(fee))?;
        last_change = change.clone();

        let change_output = TxOutput::new(context.change_address.clone(), change.clone());
        let change_min = params.min_ada_for_output(&change_output);
        if change.lovelace() < change_min {
            debug!("Attempt {attempt}: change {change} below minimum {change_min}");
            min_change = change_min;
            continue;
        }

        let mut candidate = draft.clone().collect_from(selection.chosen, None);
        candidate.outputs.push(change_output);
        if needs_collateral {
            candidate.collateral = vec![choose_collateral(&context.wallet_utxos, fee, params)?];
        }

        let estimated = estimate_fee(&candidate, params);
        debug!("Attempt {attempt}: fee {fee}, estimated {estimated}, change {change}");
        if fee >= estimated {
            let tx = candidate.assemble(fee, params)?;
            info!(
                "Balanced transaction {} with fee {fee} after {attempt} attempts",
                tx.id()
            );
            return Ok(tx);
        }
        fee = estimated;
    }

    Err(TxBuildError::Unbalanceable {
        attempts: MAX_BALANCE_ATTEMPTS,
        last_fee: fee,
        last_change,
    })
}

/// Explicit outputs carrying less than the ledger minimum are topped up
fn raise_outputs_to_minimum(draft: &mut TransactionDraft, params: &ProtocolParams) {
    for output in draft.outputs.iter_mut() {
        let min = params.min_ada_for_output(output);
        if output.value.lovelace() < min {
            output.value.set_lovelace(min);
        }
    }
}

/// Smallest lovelace-only wallet UTxO covering the collateral for `fee`
fn choose_collateral(
    wallet_utxos: &[UTxO],
    fee: Lovelace,
    params: &ProtocolParams,
) -> Result<UTxO, TxBuildError> {
    let required = params.collateral_required(fee);
    wallet_utxos
        .iter()
        .filter(|utxo| utxo.is_pure_lovelace() && utxo.value().lovelace() >= required)
        .min_by_key(|utxo| (utxo.value().lovelace(), utxo.id))
        .cloned()
        .ok_or(TxBuildError::MissingCollateral { required })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_common::{
        validation::ValueError, AssetId, AssetName, Datum, Hash, NetworkId, PlutusData,
        PlutusScript, PlutusVersion, SlotConfig, UTxOIdentifier,
    };
    use std::collections::BTreeMap;

    const ADA: u64 = 1_000_000;

    fn wallet_address() -> Address {
        Address::from_key_hash(NetworkId::Testnet, Hash::new([1; 28]))
    }

    fn other_address() -> Address {
        Address::from_key_hash(NetworkId::Testnet, Hash::new([2; 28]))
    }

    fn wallet_utxo(byte: u8, value: Value) -> UTxO {
        UTxO::new(
            UTxOIdentifier::new(Hash::new([byte; 32]), 0),
            TxOutput::new(wallet_address(), value),
        )
    }

    fn context(wallet_utxos: Vec<UTxO>) -> BalanceContext {
        BalanceContext {
            wallet_utxos,
            change_address: wallet_address(),
            params: ProtocolParams::default(),
        }
    }

    fn input_total(tx: &Transaction, known: &[UTxO]) -> Value {
        Value::sum(
            tx.body()
                .inputs
                .iter()
                .filter_map(|id| known.iter().find(|utxo| utxo.id == *id))
                .map(|utxo| &utxo.output.value),
        )
    }

    fn output_total(tx: &Transaction) -> Value {
        Value::sum(tx.body().outputs.iter().map(|output| &output.value))
    }

    #[test]
    fn pays_from_single_utxo_with_change() {
        let wallet = vec![wallet_utxo(1, Value::from_lovelace(100 * ADA))];
        let draft = TransactionDraft::new(SlotConfig::default())
            .pay_to_address(&other_address(), Value::from_lovelace(40 * ADA));
        let tx = balance(draft, &context(wallet.clone())).unwrap();

        assert_eq!(tx.body().inputs, vec![wallet[0].id]);
        let fee = tx.fee();
        assert!(fee > 0);
        let change = &tx.body().outputs[1];
        assert_eq!(change.address, wallet_address());
        assert_eq!(change.value.lovelace(), 100 * ADA - 40 * ADA - fee);
        assert!(change.value.lovelace() >= ProtocolParams::default().min_ada_for_output(change));
    }

    #[test]
    fn inputs_equal_outputs_plus_fee() {
        let wallet = vec![
            wallet_utxo(1, Value::from_lovelace(3 * ADA)),
            wallet_utxo(2, Value::from_lovelace(4 * ADA)),
            wallet_utxo(3, Value::from_lovelace(20 * ADA)),
        ];
        let draft = TransactionDraft::default()
            .pay_to_address(&other_address(), Value::from_lovelace(5 * ADA))
            .pay_to_address(&other_address(), Value::from_lovelace(6 * ADA));
        let tx = balance(draft, &context(wallet.clone())).unwrap();

        let produced = output_total(&tx).checked_add(&Value::from_lovelace(tx.fee())).unwrap();
        assert_eq!(input_total(&tx, &wallet), produced);
        assert!(tx.fee() >= estimate_fee_of(&tx, &wallet));
    }

    // Re-estimate from the finished transaction's parts
    fn estimate_fee_of(tx: &Transaction, wallet: &[UTxO]) -> Lovelace {
        let inputs: Vec<UTxO> = wallet
            .iter()
            .filter(|utxo| tx.body().inputs.contains(&utxo.id))
            .cloned()
            .collect();
        let mut draft = TransactionDraft::default().collect_from(inputs, None);
        draft.outputs = tx.body().outputs.clone();
        estimate_fee(&draft, &ProtocolParams::default())
    }

    #[test]
    fn minted_tokens_go_to_change() {
        let params = ProtocolParams::default();
        let policy = PlutusScript::new(PlutusVersion::V2, vec![0x4e; 30]);
        let name = AssetName::from_text("FLAG").unwrap();
        let wallet = vec![wallet_utxo(1, Value::from_lovelace(50 * ADA))];
        let draft = TransactionDraft::default().attach_mint(
            &policy,
            BTreeMap::from([(name, 3)]),
            PlutusData::unit(),
        );
        let tx = balance(draft, &context(wallet.clone())).unwrap();

        let token = AssetId::Native(policy.hash(), name);
        assert_eq!(output_total(&tx).quantity_of(&token), 3);
        assert_eq!(tx.body().collateral, vec![wallet[0].id]);
        assert!(params.collateral_required(tx.fee()) <= 50 * ADA);
        assert_eq!(tx.witnesses().redeemers.len(), 1);

        let consumed = input_total(&tx, &wallet).checked_add(&minted_value(&tx.body().mint)).unwrap();
        let produced = output_total(&tx).checked_add(&Value::from_lovelace(tx.fee())).unwrap();
        assert_eq!(consumed, produced);
    }

    #[test]
    fn burning_consumes_wallet_tokens() {
        let policy = PlutusScript::new(PlutusVersion::V2, vec![0x4e; 30]);
        let name = AssetName::from_text("FLAG").unwrap();
        let wallet = vec![
            wallet_utxo(1, Value::from_lovelace(2 * ADA).with_asset(policy.hash(), name, 1)),
            wallet_utxo(2, Value::from_lovelace(30 * ADA)),
        ];
        let draft = TransactionDraft::default().attach_mint(
            &policy,
            BTreeMap::from([(name, -1)]),
            PlutusData::unit(),
        );
        let tx = balance(draft, &context(wallet.clone())).unwrap();
        assert!(tx.body().inputs.contains(&wallet[0].id));
        assert!(!output_total(&tx).has_native_assets());
    }

    #[test]
    fn requirement_above_total_is_insufficient() {
        let wallet = vec![wallet_utxo(1, Value::from_lovelace(10 * ADA))];
        let draft =
            TransactionDraft::default().pay_to_address(&other_address(), Value::from_lovelace(20 * ADA));
        assert!(matches!(
            balance(draft, &context(wallet)),
            Err(TxBuildError::InsufficientFunds { .. })
        ));
    }

    // Every wallet UTxO brings a token from its own policy and less lovelace
    // than that token adds to the change minimum, so the change never covers
    // its own minimum
    #[test]
    fn growing_change_minimum_is_unbalanceable() {
        let params = ProtocolParams::default();
        let name = AssetName::from_text("F").unwrap();
        let policy = |index: u16| {
            let mut bytes = [0u8; 28];
            bytes[..2].copy_from_slice(&index.to_be_bytes());
            Hash::new(bytes)
        };
        let change_with = |count: u16| {
            let value = (0..count).fold(Value::default(), |value, index| {
                value.with_asset(policy(index), name, 1)
            });
            params.min_ada_for_output(&TxOutput::new(wallet_address(), value))
        };
        let per_token = change_with(2) - change_with(1);
        let lovelace = per_token - 1_000;

        let wallet: Vec<UTxO> = (0..1_000u16)
            .map(|index| {
                UTxO::new(
                    UTxOIdentifier::new(Hash::new([5; 32]), index),
                    TxOutput::new(
                        wallet_address(),
                        Value::from_lovelace(lovelace).with_asset(policy(index), name, 1),
                    ),
                )
            })
            .collect();
        let draft = TransactionDraft::default().pay_to_address(&other_address(), Value::from_lovelace(ADA));

        match balance(draft, &context(wallet)) {
            Err(TxBuildError::Unbalanceable {
                attempts,
                last_fee,
                last_change,
            }) => {
                assert_eq!(attempts, MAX_BALANCE_ATTEMPTS);
                assert_eq!(last_fee, 0);
                assert_eq!((last_change.lovelace() + ADA) % lovelace, 0);
                assert!(last_change.has_native_assets());
                let change_output = TxOutput::new(wallet_address(), last_change.clone());
                assert!(last_change.lovelace() < params.min_ada_for_output(&change_output));
            }
            other => panic!("expected Unbalanceable, got {other:?}"),
        }
    }

    #[test]
    fn mint_overflow_stops_balancing() {
        let name = AssetName::from_text("FLAG").unwrap();
        let policy = Hash::new([6; 28]);
        let wallet = vec![wallet_utxo(1, Value::from_lovelace(20 * ADA))];
        let draft = TransactionDraft::default()
            .mint_assets(policy, BTreeMap::from([(name, i64::MIN)]), None)
            .mint_assets(policy, BTreeMap::from([(name, -1)]), None);
        assert!(matches!(
            balance(draft, &context(wallet)),
            Err(TxBuildError::Value(ValueError::Overflow { .. }))
        ));
    }

    #[test]
    fn small_outputs_are_raised_to_minimum() {
        let wallet = vec![wallet_utxo(1, Value::from_lovelace(10 * ADA))];
        let draft = TransactionDraft::default().pay_to_address(&other_address(), Value::from_lovelace(1));
        let tx = balance(draft, &context(wallet)).unwrap();
        let output = &tx.body().outputs[0];
        assert_eq!(output.value.lovelace(), ProtocolParams::default().min_ada_for_output(output));
    }

    #[test]
    fn script_input_without_validator_fails() {
        let script = PlutusScript::new(PlutusVersion::V2, vec![0x4e; 30]);
        let locked = UTxO::new(
            UTxOIdentifier::new(Hash::new([8; 32]), 0),
            TxOutput::new(script.address(NetworkId::Testnet), Value::from_lovelace(10 * ADA))
                .with_datum(Datum::Inline(PlutusData::unit())),
        );
        let wallet = vec![wallet_utxo(1, Value::from_lovelace(20 * ADA))];
        let draft = TransactionDraft::default().collect_from([locked], Some(PlutusData::unit()));
        assert!(matches!(
            balance(draft, &context(wallet)),
            Err(TxBuildError::MissingScript { .. })
        ));
    }

    #[test]
    fn script_spend_without_pure_lovelace_collateral_fails() {
        let script = PlutusScript::new(PlutusVersion::V2, vec![0x4e; 30]);
        let locked = UTxO::new(
            UTxOIdentifier::new(Hash::new([8; 32]), 0),
            TxOutput::new(script.address(NetworkId::Testnet), Value::from_lovelace(10 * ADA))
                .with_datum(Datum::Inline(PlutusData::unit())),
        );
        let token = AssetName::from_text("T").unwrap();
        let wallet = vec![wallet_utxo(1, Value::from_lovelace(20 * ADA).with_asset(Hash::new([4; 28]), token, 1))];
        let draft = TransactionDraft::default().attach_spending(locked, &script, PlutusData::unit());
        assert!(matches!(
            balance(draft, &context(wallet)),
            Err(TxBuildError::MissingCollateral { .. })
        ));
    }
}
