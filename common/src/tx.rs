//! Finalized transactions and their CBOR encoding

use std::collections::BTreeMap;

use minicbor::Encoder;

use crate::{
    asset::{Lovelace, Mint},
    crypto::{blake2b_256, PublicKey, Signature, SigningKey},
    hash::{Hash, KeyHash, TxHash},
    plutus_data::PlutusData,
    script::{ExUnits, PlutusScript, PlutusVersion, Redeemer},
    utxo::{TxOutput, UTxOIdentifier},
};

pub type ScriptDataHash = Hash<32>;

type EncodeResult<W> = Result<(), minicbor::encode::Error<<W as minicbor::encode::Write>::Error>>;

/// Transaction body. Inputs, collateral and required signers are kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxBody {
    pub inputs: Vec<UTxOIdentifier>,
    pub outputs: Vec<TxOutput>,
    pub fee: Lovelace,

    /// Last valid slot
    pub ttl: Option<u64>,

    /// First valid slot
    pub validity_start: Option<u64>,
    pub mint: Mint,
    pub script_data_hash: Option<ScriptDataHash>,
    pub collateral: Vec<UTxOIdentifier>,
    pub required_signers: Vec<KeyHash>,
}

impl<C> minicbor::Encode<C> for TxBody {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        let entries = 3
            + self.ttl.is_some() as u64
            + self.validity_start.is_some() as u64
            + !self.mint.is_empty() as u64
            + self.script_data_hash.is_some() as u64
            + !self.collateral.is_empty() as u64
            + !self.required_signers.is_empty() as u64;
        e.map(entries)?;

        e.u8(0)?.encode_with(&self.inputs, ctx)?;
        e.u8(1)?.encode_with(&self.outputs, ctx)?;
        e.u8(2)?.u64(self.fee)?;
        if let Some(ttl) = self.ttl {
            e.u8(3)?.u64(ttl)?;
        }
        if let Some(start) = self.validity_start {
            e.u8(8)?.u64(start)?;
        }
        if !self.mint.is_empty() {
            e.u8(9)?.map(self.mint.len() as u64)?;
            for (policy, deltas) in &self.mint {
                e.encode_with(policy, ctx)?.map(deltas.len() as u64)?;
                for (name, delta) in deltas {
                    e.bytes(name.as_slice())?.i64(*delta)?;
                }
            }
        }
        if let Some(hash) = &self.script_data_hash {
            e.u8(11)?.encode_with(hash, ctx)?;
        }
        if !self.collateral.is_empty() {
            e.u8(13)?.encode_with(&self.collateral, ctx)?;
        }
        if !self.required_signers.is_empty() {
            e.u8(14)?.encode_with(&self.required_signers, ctx)?;
        }
        Ok(())
    }
}

/// Non-signature witnesses: scripts, datums and redeemers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WitnessSet {
    pub scripts: Vec<PlutusScript>,
    pub datums: Vec<PlutusData>,

    /// Sorted by redeemer pointer
    pub redeemers: Vec<Redeemer>,
}

impl WitnessSet {
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.datums.is_empty() && self.redeemers.is_empty()
    }

    pub fn ex_units(&self) -> impl Iterator<Item = &ExUnits> {
        self.redeemers.iter().map(|r| &r.ex_units)
    }

    fn encode_with_vkeys<W: minicbor::encode::Write>(
        &self,
        vkeys: &[VKeyWitness],
        e: &mut Encoder<W>,
    ) -> EncodeResult<W> {
        let mut by_version: BTreeMap<u64, Vec<&PlutusScript>> = BTreeMap::new();
        for script in &self.scripts {
            by_version.entry(script.version.witness_key()).or_default().push(script);
        }

        let entries = !vkeys.is_empty() as u64
            + by_version.len() as u64
            + !self.datums.is_empty() as u64
            + !self.redeemers.is_empty() as u64;
        e.map(entries)?;

        if !vkeys.is_empty() {
            e.u8(0)?.array(vkeys.len() as u64)?;
            for witness in vkeys {
                e.array(2)?.bytes(witness.vkey.as_ref())?.bytes(witness.signature.as_ref())?;
            }
        }
        // Keys 3, 4, 5, 6, 7 must stay in ascending order
        for (key, scripts) in by_version.range(..4) {
            encode_scripts(*key, scripts, e)?;
        }
        if !self.datums.is_empty() {
            e.u8(4)?;
            encode_datums(&self.datums, e)?;
        }
        if !self.redeemers.is_empty() {
            e.u8(5)?;
            encode_redeemers(&self.redeemers, e)?;
        }
        for (key, scripts) in by_version.range(4..) {
            encode_scripts(*key, scripts, e)?;
        }
        Ok(())
    }
}

fn encode_scripts<W: minicbor::encode::Write>(
    key: u64,
    scripts: &[&PlutusScript],
    e: &mut Encoder<W>,
) -> EncodeResult<W> {
    e.u64(key)?.array(scripts.len() as u64)?;
    for script in scripts {
        e.bytes(&script.code)?;
    }
    Ok(())
}

fn encode_datums<W: minicbor::encode::Write>(datums: &[PlutusData], e: &mut Encoder<W>) -> EncodeResult<W> {
    e.array(datums.len() as u64)?;
    for datum in datums {
        e.encode(datum)?;
    }
    Ok(())
}

fn encode_redeemers<W: minicbor::encode::Write>(
    redeemers: &[Redeemer],
    e: &mut Encoder<W>,
) -> EncodeResult<W> {
    e.array(redeemers.len() as u64)?;
    for redeemer in redeemers {
        e.array(4)?.u8(redeemer.tag.code())?.u32(redeemer.index)?;
        e.encode(&redeemer.data)?;
        e.array(2)?.u64(redeemer.ex_units.mem)?.u64(redeemer.ex_units.steps)?;
    }
    Ok(())
}

/// Hash binding redeemers, datums and the cost models of the languages in use
pub fn script_data_hash(
    redeemers: &[Redeemer],
    datums: &[PlutusData],
    cost_models: &BTreeMap<PlutusVersion, Vec<i64>>,
) -> ScriptDataHash {
    let mut preimage = Vec::new();
    let mut e = Encoder::new(&mut preimage);
    encode_script_data(redeemers, datums, cost_models, &mut e).expect("infallible");
    blake2b_256(&preimage)
}

fn encode_script_data<W: minicbor::encode::Write>(
    redeemers: &[Redeemer],
    datums: &[PlutusData],
    cost_models: &BTreeMap<PlutusVersion, Vec<i64>>,
    e: &mut Encoder<W>,
) -> EncodeResult<W> {
    encode_redeemers(redeemers, e)?;
    if !datums.is_empty() {
        encode_datums(datums, e)?;
    }
    encode_language_views(cost_models, e)
}

fn encode_language_views<W: minicbor::encode::Write>(
    cost_models: &BTreeMap<PlutusVersion, Vec<i64>>,
    e: &mut Encoder<W>,
) -> EncodeResult<W> {
    e.map(cost_models.len() as u64)?;
    // Canonical key order: the integer keys of V2 and V3 sort before V1's byte string key
    let ordered = [PlutusVersion::V2, PlutusVersion::V3, PlutusVersion::V1];
    for version in ordered {
        let Some(costs) = cost_models.get(&version) else {
            continue;
        };
        match version {
            PlutusVersion::V1 => {
                // V1 views are an indefinite array wrapped in a byte string
                let mut inner = Encoder::new(Vec::new());
                inner.begin_array().expect("infallible");
                for cost in costs {
                    inner.i64(*cost).expect("infallible");
                }
                inner.end().expect("infallible");
                e.bytes(&[0x00])?.bytes(&inner.into_writer())?;
            }
            PlutusVersion::V2 | PlutusVersion::V3 => {
                e.u8(version.tag() - 1)?.array(costs.len() as u64)?;
                for cost in costs {
                    e.i64(*cost)?;
                }
            }
        }
    }
    Ok(())
}

/// Balanced, fee-paid transaction awaiting signatures. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    body: TxBody,
    witnesses: WitnessSet,
}

impl Transaction {
    pub fn new(body: TxBody, witnesses: WitnessSet) -> Self {
        Self { body, witnesses }
    }

    pub fn body(&self) -> &TxBody {
        &self.body
    }

    pub fn witnesses(&self) -> &WitnessSet {
        &self.witnesses
    }

    pub fn fee(&self) -> Lovelace {
        self.body.fee
    }

    pub fn body_cbor(&self) -> Vec<u8> {
        minicbor::to_vec(&self.body).expect("infallible")
    }

    /// Blake2b-256 of the encoded body
    pub fn id(&self) -> TxHash {
        blake2b_256(&self.body_cbor())
    }

    /// Encoded size once `signers` vkey witnesses are added
    pub fn size_with_signers(&self, signers: usize) -> usize {
        let placeholders = vec![VKeyWitness::placeholder(); signers];
        encode_transaction(&self.body, &self.witnesses, &placeholders).len()
    }

    pub fn sign(self, key: &SigningKey) -> SignedTransaction {
        SignedTransaction {
            tx: self,
            vkey_witnesses: Vec::new(),
        }
        .sign(key)
    }
}

/// Verification key and its signature over the transaction id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VKeyWitness {
    pub vkey: PublicKey,
    pub signature: Signature,
}

impl VKeyWitness {
    fn placeholder() -> Self {
        Self {
            vkey: PublicKey::zero(),
            signature: Signature::zero(),
        }
    }

    pub fn key_hash(&self) -> KeyHash {
        self.vkey.hash()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
    vkey_witnesses: Vec<VKeyWitness>,
}

impl SignedTransaction {
    /// Add a signature; signing twice with the same key is a no-op
    pub fn sign(mut self, key: &SigningKey) -> Self {
        let vkey = key.public_key();
        if self.vkey_witnesses.iter().all(|w| w.vkey != vkey) {
            let signature = key.sign(self.tx.id());
            self.vkey_witnesses.push(VKeyWitness { vkey, signature });
        }
        self
    }

    pub fn id(&self) -> TxHash {
        self.tx.id()
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn vkey_witnesses(&self) -> &[VKeyWitness] {
        &self.vkey_witnesses
    }

    /// Full `[body, witness_set, is_valid, auxiliary_data]` encoding
    pub fn to_cbor(&self) -> Vec<u8> {
        encode_transaction(&self.tx.body, &self.tx.witnesses, &self.vkey_witnesses)
    }
}

fn encode_transaction(body: &TxBody, witnesses: &WitnessSet, vkeys: &[VKeyWitness]) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut e = Encoder::new(&mut buffer);
    encode_transaction_parts(body, witnesses, vkeys, &mut e).expect("infallible");
    buffer
}

fn encode_transaction_parts<W: minicbor::encode::Write>(
    body: &TxBody,
    witnesses: &WitnessSet,
    vkeys: &[VKeyWitness],
    e: &mut Encoder<W>,
) -> EncodeResult<W> {
    e.array(4)?.encode(body)?;
    witnesses.encode_with_vkeys(vkeys, e)?;
    e.bool(true)?.null()?;
    Ok(())
}
