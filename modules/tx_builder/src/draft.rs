//! Accumulating transaction builder state

use std::collections::{BTreeMap, BTreeSet};

use ctf_common::{
    asset::AssetDeltas,
    protocol_params::ProtocolParams,
    script::get_scripts_needed_from_inputs,
    tx::{script_data_hash, TxBody, WitnessSet},
    validation::TxBuildError,
    validation::ValueError,
    Address, AssetId, Datum, DatumHash, KeyHash, Lovelace, Mint, PlutusData, PlutusScript,
    PolicyId, Redeemer, RedeemerTag, ScriptHash, SlotConfig, Transaction, TxOutput, UTxO,
    UTxOIdentifier, Value,
};

use crate::witness::check_script_witnesses;

/// How a datum is attached to an output paid to a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDatum {
    /// Stored in the output itself
    Inline(PlutusData),

    /// Only the hash is stored; the datum travels in the witness set
    AsHash(PlutusData),
}

/// Transaction under construction. Builder calls accumulate state; the
/// balancer turns it into an immutable [`Transaction`].
#[derive(Debug, Clone, Default)]
pub struct TransactionDraft {
    pub(crate) inputs: BTreeMap<UTxOIdentifier, UTxO>,
    pub(crate) spend_redeemers: BTreeMap<UTxOIdentifier, PlutusData>,
    pub(crate) outputs: Vec<TxOutput>,
    pub(crate) mint: Mint,
    pub(crate) mint_redeemers: BTreeMap<PolicyId, PlutusData>,
    pub(crate) validity_start: Option<u64>,
    pub(crate) ttl: Option<u64>,
    pub(crate) required_signers: BTreeSet<KeyHash>,
    pub(crate) scripts: BTreeMap<ScriptHash, PlutusScript>,
    pub(crate) datums: BTreeMap<DatumHash, PlutusData>,
    pub(crate) collateral: Vec<UTxO>,
    slot_config: SlotConfig,

    /// First asset whose accumulated mint delta left the `i64` range
    mint_overflow: Option<AssetId>,
}

impl TransactionDraft {
    pub fn new(slot_config: SlotConfig) -> Self {
        Self {
            slot_config,
            ..Default::default()
        }
    }

    /// Spend the given UTxOs, all with the same redeemer if one is given
    pub fn collect_from(
        mut self,
        utxos: impl IntoIterator<Item = UTxO>,
        redeemer: Option<PlutusData>,
    ) -> Self {
        for utxo in utxos {
            if let Some(redeemer) = &redeemer {
                self.spend_redeemers.insert(utxo.id, redeemer.clone());
            }
            self.inputs.insert(utxo.id, utxo);
        }
        self
    }

    /// Spend a script-locked UTxO with its validator and redeemer
    pub fn attach_spending(
        self,
        utxo: UTxO,
        validator: &PlutusScript,
        redeemer: PlutusData,
    ) -> Self {
        self.collect_from([utxo], Some(redeemer)).attach_spending_validator(validator)
    }

    pub fn attach_spending_validator(mut self, validator: &PlutusScript) -> Self {
        self.scripts.insert(validator.hash(), validator.clone());
        self
    }

    pub fn attach_minting_policy(self, policy: &PlutusScript) -> Self {
        self.attach_spending_validator(policy)
    }

    /// Mint (positive) or burn (negative) under a policy, attaching the policy
    pub fn attach_mint(self, policy: &PlutusScript, deltas: AssetDeltas, redeemer: PlutusData) -> Self {
        self.mint_assets(policy.hash(), deltas, Some(redeemer)).attach_minting_policy(policy)
    }

    /// Mint or burn by policy id; the policy script is attached separately
    pub fn mint_assets(
        mut self,
        policy_id: PolicyId,
        deltas: AssetDeltas,
        redeemer: Option<PlutusData>,
    ) -> Self {
        let entry = self.mint.entry(policy_id).or_default();
        for (name, delta) in deltas {
            let quantity = entry.entry(name).or_insert(0);
            match quantity.checked_add(delta) {
                Some(sum) => *quantity = sum,
                None => {
                    self.mint_overflow.get_or_insert(AssetId::Native(policy_id, name));
                }
            }
        }
        if let Some(redeemer) = redeemer {
            self.mint_redeemers.insert(policy_id, redeemer);
        }
        self
    }

    pub fn pay_to_address(mut self, address: &Address, value: Value) -> Self {
        self.outputs.push(TxOutput::new(address.clone(), value));
        self
    }

    pub fn pay_to_contract(mut self, address: &Address, datum: OutputDatum, value: Value) -> Self {
        let datum = match datum {
            OutputDatum::Inline(data) => Datum::Inline(data),
            OutputDatum::AsHash(data) => {
                let hash = data.hash();
                self.datums.insert(hash, data);
                Datum::Hash(hash)
            }
        };
        self.outputs.push(TxOutput::new(address.clone(), value).with_datum(datum));
        self
    }

    /// Supply a datum needed to spend an input locked with a datum hash
    pub fn provide_datum(mut self, data: PlutusData) -> Self {
        self.datums.insert(data.hash(), data);
        self
    }

    pub fn add_signer(mut self, key_hash: KeyHash) -> Self {
        self.required_signers.insert(key_hash);
        self
    }

    /// Not valid before this POSIX time (milliseconds)
    pub fn valid_from(mut self, posix_ms: u64) -> Self {
        self.validity_start = Some(self.slot_config.slot_at(posix_ms));
        self
    }

    /// Not valid after this POSIX time (milliseconds)
    pub fn valid_to(mut self, posix_ms: u64) -> Self {
        self.ttl = Some(self.slot_config.slot_at(posix_ms));
        self
    }

    pub fn inputs(&self) -> impl Iterator<Item = &UTxO> {
        self.inputs.values()
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    pub fn mint(&self) -> &Mint {
        &self.mint
    }

    pub fn has_redeemers(&self) -> bool {
        !self.spend_redeemers.is_empty() || !self.mint_redeemers.is_empty()
    }

    /// Value of explicit inputs
    pub(crate) fn input_value(&self) -> Value {
        Value::sum(self.inputs.values().map(|utxo| &utxo.output.value))
    }

    pub(crate) fn output_value(&self) -> Value {
        Value::sum(self.outputs.iter().map(|output| &output.value))
    }

    /// Mint deltas that overflowed while accumulating
    pub(crate) fn check_mint(&self) -> Result<(), ValueError> {
        match &self.mint_overflow {
            Some(asset) => Err(ValueError::Overflow { asset: *asset }),
            None => Ok(()),
        }
    }

    /// Drop zero deltas and policies left with nothing to mint or burn
    pub(crate) fn normalise_mint(&mut self) {
        for deltas in self.mint.values_mut() {
            deltas.retain(|_, delta| *delta != 0);
        }
        self.mint.retain(|_, deltas| !deltas.is_empty());
        let mint = &self.mint;
        self.mint_redeemers.retain(|policy, _| mint.contains_key(policy));
    }

    /// Key hashes that must sign: explicit signers plus owners of key-locked
    /// inputs and collateral
    pub(crate) fn signing_keys(&self) -> BTreeSet<KeyHash> {
        let mut keys = self.required_signers.clone();
        for utxo in self.inputs.values().chain(self.collateral.iter()) {
            if let Some(key_hash) = utxo.output.address.payment_key_hash() {
                keys.insert(key_hash);
            }
        }
        keys
    }

    /// Build body and witnesses as they currently stand, binding redeemers to
    /// pointers in the canonical input and policy order
    pub(crate) fn assemble_unchecked(&self, fee: Lovelace, params: &ProtocolParams) -> Transaction {
        let sorted_inputs: Vec<UTxO> = self.inputs.values().cloned().collect();

        let mut redeemers = Vec::new();
        for (index, utxo) in sorted_inputs.iter().enumerate() {
            if let Some(data) = self.spend_redeemers.get(&utxo.id) {
                redeemers.push(redeemer(RedeemerTag::Spend, index, data, params));
            }
        }
        for (index, policy) in self.mint.keys().enumerate() {
            if let Some(data) = self.mint_redeemers.get(policy) {
                redeemers.push(redeemer(RedeemerTag::Mint, index, data, params));
            }
        }

        let needed: BTreeSet<ScriptHash> = get_scripts_needed_from_inputs(&sorted_inputs)
            .into_iter()
            .map(|(_, hash)| hash)
            .chain(self.mint.keys().copied())
            .collect();
        let scripts: Vec<PlutusScript> = self
            .scripts
            .iter()
            .filter(|(hash, _)| needed.contains(hash))
            .map(|(_, script)| script.clone())
            .collect();
        let datums: Vec<PlutusData> = self.datums.values().cloned().collect();

        let script_data_hash = (!redeemers.is_empty() || !datums.is_empty()).then(|| {
            let languages: BTreeSet<_> = scripts.iter().map(|s| s.version).collect();
            let cost_models = params
                .cost_models
                .iter()
                .filter(|(version, _)| languages.contains(version))
                .map(|(version, costs)| (*version, costs.clone()))
                .collect();
            script_data_hash(&redeemers, &datums, &cost_models)
        });

        let body = TxBody {
            inputs: self.inputs.keys().copied().collect(),
            outputs: self.outputs.clone(),
            fee,
            ttl: self.ttl,
            validity_start: self.validity_start,
            mint: self.mint.clone(),
            script_data_hash,
            collateral: self.collateral.iter().map(|utxo| utxo.id).collect(),
            required_signers: self.required_signers.iter().copied().collect(),
        };
        let witnesses = WitnessSet {
            scripts,
            datums,
            redeemers,
        };
        Transaction::new(body, witnesses)
    }

    /// As [`Self::assemble_unchecked`], but first verify every script-locked
    /// input and mint policy has its script, redeemer and datum
    pub(crate) fn assemble(
        &self,
        fee: Lovelace,
        params: &ProtocolParams,
    ) -> Result<Transaction, TxBuildError> {
        self.check_mint()?;
        let sorted_inputs: Vec<UTxO> = self.inputs.values().cloned().collect();
        check_script_witnesses(
            &sorted_inputs,
            &self.spend_redeemers,
            &self.mint,
            &self.mint_redeemers,
            &self.scripts,
            &self.datums,
        )?;
        Ok(self.assemble_unchecked(fee, params))
    }
}

// Every redeemer gets the default budget; scripts are not evaluated here
fn redeemer(tag: RedeemerTag, index: usize, data: &PlutusData, params: &ProtocolParams) -> Redeemer {
    Redeemer {
        tag,
        index: index as u32,
        data: data.clone(),
        ex_units: params.default_redeemer_budget,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_common::{AssetName, Hash, NetworkId, PlutusVersion};

    fn script() -> PlutusScript {
        PlutusScript::new(PlutusVersion::V2, vec![0x46, 0x01, 0x00, 0x00, 0x22, 0x00, 0x11])
    }

    fn script_utxo(script: &PlutusScript, index: u16) -> UTxO {
        UTxO::new(
            UTxOIdentifier::new(Hash::new([7; 32]), index),
            TxOutput::new(script.address(NetworkId::Testnet), Value::from_lovelace(5_000_000))
                .with_datum(Datum::Inline(PlutusData::unit())),
        )
    }

    #[test]
    fn redeemer_pointers_follow_sorted_inputs() {
        let script = script();
        let draft = TransactionDraft::default()
            .attach_spending(script_utxo(&script, 4), &script, PlutusData::integer(4))
            .attach_spending(script_utxo(&script, 1), &script, PlutusData::integer(1));
        let tx = draft.assemble(200_000, &ProtocolParams::default()).unwrap();
        let redeemers = &tx.witnesses().redeemers;
        assert_eq!(redeemers[0].index, 0);
        assert_eq!(redeemers[0].data, PlutusData::integer(1));
        assert_eq!(redeemers[1].index, 1);
        assert_eq!(tx.witnesses().scripts.len(), 1);
        assert!(tx.body().script_data_hash.is_some());
    }

    #[test]
    fn mint_deltas_accumulate_and_normalise() {
        let name = AssetName::from_text("FLAG").unwrap();
        let policy = Hash::new([3; 28]);
        let mut draft = TransactionDraft::default()
            .mint_assets(policy, BTreeMap::from([(name, 2)]), Some(PlutusData::unit()))
            .mint_assets(policy, BTreeMap::from([(name, -2)]), None);
        draft.normalise_mint();
        assert!(draft.mint().is_empty());
        assert!(!draft.has_redeemers());
    }

    #[test]
    fn mint_delta_overflow_is_an_error() {
        let name = AssetName::from_text("FLAG").unwrap();
        let policy = Hash::new([3; 28]);
        let draft = TransactionDraft::default()
            .mint_assets(policy, BTreeMap::from([(name, i64::MAX)]), Some(PlutusData::unit()))
            .mint_assets(policy, BTreeMap::from([(name, 1)]), None);
        assert_eq!(draft.mint()[&policy][&name], i64::MAX);
        assert_eq!(
            draft.assemble(200_000, &ProtocolParams::default()).unwrap_err(),
            TxBuildError::Value(ValueError::Overflow {
                asset: AssetId::Native(policy, name)
            })
        );
    }

    #[test]
    fn hashed_datum_is_supplied_in_witnesses() {
        let address = script().address(NetworkId::Testnet);
        let datum = PlutusData::bytes(b"secret");
        let draft = TransactionDraft::default().pay_to_contract(
            &address,
            OutputDatum::AsHash(datum.clone()),
            Value::from_lovelace(2_000_000),
        );
        assert_eq!(draft.outputs()[0].datum, Some(Datum::Hash(datum.hash())));
        let tx = draft.assemble_unchecked(0, &ProtocolParams::default());
        assert_eq!(tx.witnesses().datums, vec![datum]);
    }

    #[test]
    fn validity_is_converted_to_slots() {
        let draft = TransactionDraft::new(SlotConfig::default())
            .valid_from(1_666_656_010_500)
            .valid_to(1_666_656_070_000);
        let tx = draft.assemble_unchecked(0, &ProtocolParams::default());
        assert_eq!(tx.body().validity_start, Some(10));
        assert_eq!(tx.body().ttl, Some(70));
    }
}
