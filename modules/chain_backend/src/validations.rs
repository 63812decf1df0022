//! Ledger rules the emulator applies to every submitted transaction

use std::collections::{BTreeMap, BTreeSet};

use ctf_common::{
    asset::{burnt_value, minted_value},
    script::{get_scripts_needed_from_inputs, get_scripts_needed_from_mint_burn},
    tx::script_data_hash,
    validation::LedgerValidationError,
    Datum, KeyHash, ProtocolParams, RedeemerPointer, RedeemerTag, ScriptHash, SignedTransaction,
    UTxO, UTxOIdentifier, Value,
};

pub type LedgerValidationResult = Result<(), Box<LedgerValidationError>>;

/// Every input is listed once, exists in the UTxO set and is not already
/// consumed by a pending transaction. Returns the resolved inputs in body
/// order.
pub fn resolve_inputs(
    inputs: &[UTxOIdentifier],
    utxos: &BTreeMap<UTxOIdentifier, UTxO>,
    pending_spent: &BTreeSet<UTxOIdentifier>,
) -> Result<Vec<UTxO>, Box<LedgerValidationError>> {
    let mut seen = BTreeSet::new();
    inputs
        .iter()
        .map(|input| {
            if !seen.insert(*input) {
                return Err(Box::new(LedgerValidationError::DuplicateInput(*input)));
            }
            match utxos.get(input) {
                Some(utxo) if !pending_spent.contains(input) => Ok(utxo.clone()),
                _ => Err(Box::new(LedgerValidationError::BadInput(*input))),
            }
        })
        .collect()
}

pub fn validate_value_not_conserved(consumed: Value, produced: Value) -> LedgerValidationResult {
    if consumed != produced {
        return Err(Box::new(LedgerValidationError::ValueNotConserved { consumed, produced }));
    }
    Ok(())
}

/// `inputs + minted == outputs + fee + burnt`
pub fn validate_conservation(tx: &SignedTransaction, resolved: &[UTxO]) -> LedgerValidationResult {
    let body = tx.tx().body();
    let mut consumed = Value::sum(resolved.iter().map(|utxo| &utxo.output.value));
    consumed += &minted_value(&body.mint);
    let mut produced = Value::sum(body.outputs.iter().map(|output| &output.value));
    produced += &Value::from_lovelace(body.fee);
    produced += &burnt_value(&body.mint);
    validate_value_not_conserved(consumed, produced)
}

pub fn validate_size_and_fee(tx: &SignedTransaction, params: &ProtocolParams) -> LedgerValidationResult {
    let size = tx.to_cbor().len() as u64;
    if size > params.max_tx_size {
        return Err(Box::new(LedgerValidationError::MaxTxSizeExceeded {
            size,
            max: params.max_tx_size,
        }));
    }
    let min_fee = params.min_fee(size, tx.tx().witnesses().ex_units());
    let fee = tx.tx().fee();
    if fee < min_fee {
        return Err(Box::new(LedgerValidationError::FeeTooSmall { fee, min_fee }));
    }
    Ok(())
}

pub fn validate_output_minimums(tx: &SignedTransaction, params: &ProtocolParams) -> LedgerValidationResult {
    for (index, output) in tx.tx().body().outputs.iter().enumerate() {
        let min = params.min_ada_for_output(output);
        if output.value.lovelace() < min {
            return Err(Box::new(LedgerValidationError::OutputTooSmall {
                index,
                lovelace: output.value.lovelace(),
                min,
            }));
        }
    }
    Ok(())
}

/// Signatures verify, and every key-locked input, collateral input and
/// required signer has one
pub fn validate_vkey_witnesses(
    tx: &SignedTransaction,
    resolved_inputs: &[UTxO],
    resolved_collateral: &[UTxO],
) -> LedgerValidationResult {
    let tx_id = tx.id();
    let mut provided = BTreeSet::new();
    for witness in tx.vkey_witnesses() {
        if !witness.vkey.verify(tx_id, &witness.signature) {
            return Err(Box::new(LedgerValidationError::InvalidSignature(witness.key_hash())));
        }
        provided.insert(witness.key_hash());
    }

    let required: BTreeSet<KeyHash> = resolved_inputs
        .iter()
        .chain(resolved_collateral)
        .filter_map(|utxo| utxo.output.address.payment_key_hash())
        .chain(tx.tx().body().required_signers.iter().copied())
        .collect();
    match required.difference(&provided).next() {
        Some(missing) => Err(Box::new(LedgerValidationError::MissingVKeyWitness(*missing))),
        None => Ok(()),
    }
}

/// Scripts, redeemers and datums needed by the sorted inputs and the mint are
/// all present, and the script data hash binds them. Returns the scripts to
/// run with their redeemer pointers.
pub fn validate_script_witnesses(
    tx: &SignedTransaction,
    resolved_inputs: &[UTxO],
    params: &ProtocolParams,
) -> Result<Vec<(RedeemerPointer, ScriptHash)>, Box<LedgerValidationError>> {
    let body = tx.tx().body();
    let witnesses = tx.tx().witnesses();
    let provided_scripts: BTreeSet<ScriptHash> =
        witnesses.scripts.iter().map(|script| script.hash()).collect();
    let provided_redeemers: BTreeSet<RedeemerPointer> =
        witnesses.redeemers.iter().map(|redeemer| redeemer.redeemer_pointer()).collect();
    let provided_datums: BTreeSet<_> = witnesses.datums.iter().map(|datum| datum.hash()).collect();

    let mut needed = get_scripts_needed_from_inputs(resolved_inputs);
    needed.extend(get_scripts_needed_from_mint_burn(&body.mint));

    for (pointer, script_hash) in &needed {
        if !provided_scripts.contains(script_hash) {
            return Err(Box::new(LedgerValidationError::MissingScript(*script_hash)));
        }
        if !provided_redeemers.contains(pointer) {
            return Err(Box::new(LedgerValidationError::MissingRedeemer(*pointer)));
        }
        if pointer.tag == RedeemerTag::Spend {
            let utxo = &resolved_inputs[pointer.index as usize];
            if let Some(Datum::Hash(datum_hash)) = &utxo.output.datum {
                if !provided_datums.contains(datum_hash) {
                    return Err(Box::new(LedgerValidationError::MissingDatum(*datum_hash)));
                }
            }
        }
    }

    let expected = (!witnesses.redeemers.is_empty() || !witnesses.datums.is_empty()).then(|| {
        let languages: BTreeSet<_> = witnesses.scripts.iter().map(|script| script.version).collect();
        let cost_models = params
            .cost_models
            .iter()
            .filter(|(version, _)| languages.contains(version))
            .map(|(version, costs)| (*version, costs.clone()))
            .collect();
        script_data_hash(&witnesses.redeemers, &witnesses.datums, &cost_models)
    });
    if body.script_data_hash != expected {
        return Err(Box::new(LedgerValidationError::ScriptDataHashMismatch));
    }

    Ok(needed)
}

/// The current slot lies in `[validity_start, ttl)`
pub fn validate_validity_interval(tx: &SignedTransaction, slot: u64) -> LedgerValidationResult {
    let body = tx.tx().body();
    let too_early = body.validity_start.is_some_and(|start| slot < start);
    let too_late = body.ttl.is_some_and(|ttl| slot >= ttl);
    if too_early || too_late {
        return Err(Box::new(LedgerValidationError::OutsideValidityInterval { slot }));
    }
    Ok(())
}

/// Transactions running scripts must put up enough lovelace-only collateral
/// in at most `max_collateral_inputs` inputs
pub fn validate_collateral(
    tx: &SignedTransaction,
    resolved_collateral: &[UTxO],
    params: &ProtocolParams,
) -> LedgerValidationResult {
    if tx.tx().witnesses().redeemers.is_empty() {
        return Ok(());
    }
    if resolved_collateral.is_empty() {
        return Err(Box::new(LedgerValidationError::NoCollateral));
    }
    if resolved_collateral.len() as u64 > params.max_collateral_inputs {
        return Err(Box::new(LedgerValidationError::TooManyCollateralInputs {
            count: resolved_collateral.len(),
            max: params.max_collateral_inputs,
        }));
    }
    if let Some(utxo) = resolved_collateral.iter().find(|utxo| !utxo.is_pure_lovelace()) {
        return Err(Box::new(LedgerValidationError::CollateralNotPureLovelace(utxo.id)));
    }
    let provided: u64 = resolved_collateral.iter().map(|utxo| utxo.output.value.lovelace()).sum();
    let required = params.collateral_required(tx.tx().fee());
    if provided < required {
        return Err(Box::new(LedgerValidationError::InsufficientCollateral { provided, required }));
    }
    Ok(())
}
