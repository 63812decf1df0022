use std::fmt;

use crate::{
    address::{Address, NetworkId},
    asset::Mint,
    crypto::blake2b_224,
    hash::{DatumHash, ScriptHash},
    plutus_data::PlutusData,
    utxo::UTxO,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum PlutusVersion {
    V1,
    V2,
    V3,
}

impl PlutusVersion {
    /// Language tag prefixed to script bytes before hashing
    pub fn tag(&self) -> u8 {
        match self {
            PlutusVersion::V1 => 1,
            PlutusVersion::V2 => 2,
            PlutusVersion::V3 => 3,
        }
    }

    /// Witness set key holding scripts of this version
    pub fn witness_key(&self) -> u64 {
        match self {
            PlutusVersion::V1 => 3,
            PlutusVersion::V2 => 6,
            PlutusVersion::V3 => 7,
        }
    }
}

/// Compiled Plutus validator or minting policy
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlutusScript {
    pub version: PlutusVersion,
    pub code: Vec<u8>,
}

impl PlutusScript {
    pub fn new(version: PlutusVersion, code: Vec<u8>) -> Self {
        Self { version, code }
    }

    pub fn hash(&self) -> ScriptHash {
        let mut data = Vec::with_capacity(self.code.len() + 1);
        data.push(self.version.tag());
        data.extend_from_slice(&self.code);
        blake2b_224(&data)
    }

    /// Enterprise address locked by this script
    pub fn address(&self, network: NetworkId) -> Address {
        Address::from_script_hash(network, self.hash())
    }
}

impl fmt::Debug for PlutusScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlutusScript")
            .field("version", &self.version)
            .field("hash", &self.hash())
            .field("size", &self.code.len())
            .finish()
    }
}

/// Datum (inline or hash)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    Hash(DatumHash),
    Inline(PlutusData),
}

impl Datum {
    pub fn hash(&self) -> DatumHash {
        match self {
            Datum::Hash(hash) => *hash,
            Datum::Inline(data) => data.hash(),
        }
    }

    pub fn inline_data(&self) -> Option<&PlutusData> {
        match self {
            Datum::Inline(data) => Some(data),
            Datum::Hash(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RedeemerTag {
    Spend,
    Mint,
}

impl RedeemerTag {
    pub fn code(&self) -> u8 {
        match self {
            RedeemerTag::Spend => 0,
            RedeemerTag::Mint => 1,
        }
    }
}

/// Execution budget
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ExUnits {
    pub mem: u64,
    pub steps: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redeemer {
    pub tag: RedeemerTag,
    pub index: u32,
    pub data: PlutusData,
    pub ex_units: ExUnits,
}

impl Redeemer {
    pub fn redeemer_pointer(&self) -> RedeemerPointer {
        RedeemerPointer {
            tag: self.tag,
            index: self.index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RedeemerPointer {
    pub tag: RedeemerTag,
    pub index: u32,
}

impl fmt::Display for RedeemerPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            RedeemerTag::Spend => write!(f, "spend:{}", self.index),
            RedeemerTag::Mint => write!(f, "mint:{}", self.index),
        }
    }
}

/// Get Scripts needed from UTxOs being spent
/// Return a list of (RedeemerPointer, ScriptHash) pairs
/// NOTE:
/// Inputs must be sorted lexicographically by UTxO identifier
pub fn get_scripts_needed_from_inputs(sorted_inputs: &[UTxO]) -> Vec<(RedeemerPointer, ScriptHash)> {
    let mut scripts_needed = Vec::new();
    for (index, utxo) in sorted_inputs.iter().enumerate() {
        if let Some(script_hash) = utxo.output.address.payment_script_hash() {
            scripts_needed.push((
                RedeemerPointer {
                    tag: RedeemerTag::Spend,
                    index: index as u32,
                },
                script_hash,
            ));
        }
    }

    scripts_needed
}

/// Get Scripts needed from mint-burn
/// Return a list of (RedeemerPointer, ScriptHash) pairs
/// NOTE:
/// Policies whose deltas are all zero are expected to be removed beforehand
pub fn get_scripts_needed_from_mint_burn(mint_burn: &Mint) -> Vec<(RedeemerPointer, ScriptHash)> {
    mint_burn
        .keys()
        .enumerate()
        .map(|(index, policy_id)| {
            (
                RedeemerPointer {
                    tag: RedeemerTag::Mint,
                    index: index as u32,
                },
                *policy_id,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::Credential,
        asset::{AssetName, Value},
        hash::{Hash, TxHash},
        utxo::{TxOutput, UTxOIdentifier},
    };
    use std::collections::BTreeMap;

    fn utxo(index: u16, payment: Credential) -> UTxO {
        UTxO::new(
            UTxOIdentifier::new(TxHash::default(), index),
            TxOutput::new(
                Address {
                    network: NetworkId::Testnet,
                    payment,
                    stake: None,
                },
                Value::from_lovelace(2_000_000),
            ),
        )
    }

    #[test]
    fn script_hash_includes_language_tag() {
        let v1 = PlutusScript::new(PlutusVersion::V1, vec![0x46, 0x01, 0x00, 0x00, 0x22, 0x00, 0x11]);
        let v2 = PlutusScript::new(PlutusVersion::V2, v1.code.clone());
        assert_ne!(v1.hash(), v2.hash());
        assert_eq!(v1.address(NetworkId::Testnet).payment_script_hash(), Some(v1.hash()));
    }

    #[test]
    fn only_script_locked_inputs_need_scripts() {
        let script = Hash::new([1u8; 28]);
        let inputs = vec![
            utxo(0, Credential::Key(Hash::new([2u8; 28]))),
            utxo(1, Credential::Script(script)),
        ];
        let needed = get_scripts_needed_from_inputs(&inputs);
        assert_eq!(
            needed,
            vec![(
                RedeemerPointer {
                    tag: RedeemerTag::Spend,
                    index: 1
                },
                script
            )]
        );
    }

    #[test]
    fn mint_pointers_follow_policy_order() {
        let mut mint = Mint::new();
        let name = AssetName::from_text("FLAG").unwrap();
        mint.insert(Hash::new([9u8; 28]), BTreeMap::from([(name, 1)]));
        mint.insert(Hash::new([3u8; 28]), BTreeMap::from([(name, -1)]));
        let needed = get_scripts_needed_from_mint_burn(&mint);
        assert_eq!(needed[0].1, Hash::new([3u8; 28]));
        assert_eq!(needed[1].0.to_string(), "mint:1");
    }
}
