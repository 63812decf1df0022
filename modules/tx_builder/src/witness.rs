//! Finalization checks: every script purpose has its script, redeemer and datum

use std::collections::BTreeMap;

use ctf_common::{
    script::{get_scripts_needed_from_inputs, get_scripts_needed_from_mint_burn},
    validation::{ScriptPurpose, TxBuildError},
    Datum, DatumHash, Mint, PlutusData, PlutusScript, PolicyId, ScriptHash, UTxO, UTxOIdentifier,
};
use tracing::debug;

/// Check script witnesses for the given inputs and mint.
/// NOTE:
/// Inputs must be sorted by UTxO identifier and the mint normalised
pub fn check_script_witnesses(
    sorted_inputs: &[UTxO],
    spend_redeemers: &BTreeMap<UTxOIdentifier, PlutusData>,
    mint: &Mint,
    mint_redeemers: &BTreeMap<PolicyId, PlutusData>,
    scripts: &BTreeMap<ScriptHash, PlutusScript>,
    datums: &BTreeMap<DatumHash, PlutusData>,
) -> Result<(), TxBuildError> {
    for (pointer, script_hash) in get_scripts_needed_from_inputs(sorted_inputs) {
        let utxo = &sorted_inputs[pointer.index as usize];
        let purpose = ScriptPurpose::Spend(utxo.id);
        debug!("{purpose} needs script {script_hash} at {pointer}");

        if !scripts.contains_key(&script_hash) {
            return Err(TxBuildError::MissingScript {
                purpose,
                script_hash,
            });
        }
        if !spend_redeemers.contains_key(&utxo.id) {
            return Err(TxBuildError::MissingRedeemer { purpose });
        }
        if let Some(Datum::Hash(datum_hash)) = &utxo.output.datum {
            if !datums.contains_key(datum_hash) {
                return Err(TxBuildError::MissingDatum {
                    input: utxo.id,
                    datum_hash: *datum_hash,
                });
            }
        }
    }

    for (pointer, policy_id) in get_scripts_needed_from_mint_burn(mint) {
        let purpose = ScriptPurpose::Mint(policy_id);
        debug!("{purpose} needs its policy at {pointer}");

        if !scripts.contains_key(&policy_id) {
            return Err(TxBuildError::MissingScript {
                purpose,
                script_hash: policy_id,
            });
        }
        if !mint_redeemers.contains_key(&policy_id) {
            return Err(TxBuildError::MissingRedeemer { purpose });
        }
    }

    Ok(())
}
