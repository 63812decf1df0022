//! Unspent transaction outputs

use anyhow::{anyhow, bail, Result};
use minicbor::data::Tag;
use std::{fmt, str::FromStr};

use crate::{
    address::Address,
    asset::Value,
    hash::{Hash, TxHash},
    plutus_data::PlutusData,
    script::Datum,
};

/// Reference to an output: the producing transaction and the output's index
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct UTxOIdentifier {
    pub tx_hash: TxHash,
    pub output_index: u16,
}

impl UTxOIdentifier {
    pub fn new(tx_hash: TxHash, output_index: u16) -> Self {
        Self {
            tx_hash,
            output_index,
        }
    }

    /// On-chain output reference: `Constr 0 [Constr 0 [tx hash], index]`
    pub fn to_plutus_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::constr(0, vec![PlutusData::bytes(self.tx_hash)]),
                PlutusData::integer(self.output_index.into()),
            ],
        )
    }

    pub fn from_plutus_data(data: &PlutusData) -> Option<Self> {
        let (0, [tx_id, index]) = data.as_constr()? else {
            return None;
        };
        let (0, [tx_hash]) = tx_id.as_constr()? else {
            return None;
        };
        Some(Self::new(
            Hash::try_from(tx_hash.as_bytes()?).ok()?,
            u16::try_from(index.as_integer()?).ok()?,
        ))
    }
}

impl fmt::Display for UTxOIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.output_index)
    }
}

impl FromStr for UTxOIdentifier {
    type Err = anyhow::Error;

    /// Parses `<tx hash hex>#<index>`
    fn from_str(s: &str) -> Result<Self> {
        let Some((hash, index)) = s.split_once('#') else {
            bail!("Expected <tx hash>#<index>, got {s}");
        };
        Ok(Self::new(
            Hash::from_str(hash).map_err(|e| anyhow!("Bad tx hash {hash}: {e}"))?,
            index.parse()?,
        ))
    }
}

/// `transaction_input = [transaction_id, index]`
impl<C> minicbor::Encode<C> for UTxOIdentifier {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.array(2)?;
        e.encode_with(self.tx_hash, ctx)?;
        e.u16(self.output_index)?;
        Ok(())
    }
}

/// What an output holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Address,
    pub value: Value,
    pub datum: Option<Datum>,
}

impl TxOutput {
    pub fn new(address: Address, value: Value) -> Self {
        Self {
            address,
            value,
            datum: None,
        }
    }

    pub fn with_datum(mut self, datum: Datum) -> Self {
        self.datum = Some(datum);
        self
    }

    /// Serialized size, as used by the minimum lovelace rule
    pub fn encoded_size(&self) -> usize {
        minicbor::to_vec(self).expect("infallible").len()
    }
}

/// Post-Alonzo map form: `{0: address, 1: value, ? 2: datum_option}`
impl<C> minicbor::Encode<C> for TxOutput {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.map(if self.datum.is_some() { 3 } else { 2 })?;
        e.u8(0)?.encode_with(&self.address, ctx)?;
        e.u8(1)?.encode_with(&self.value, ctx)?;
        match &self.datum {
            Some(Datum::Hash(hash)) => {
                e.u8(2)?.array(2)?.u8(0)?.encode_with(hash, ctx)?;
            }
            Some(Datum::Inline(data)) => {
                e.u8(2)?.array(2)?.u8(1)?;
                e.tag(Tag::new(24))?.bytes(&data.to_cbor())?;
            }
            None => {}
        }
        Ok(())
    }
}

/// An unspent output together with its reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UTxO {
    pub id: UTxOIdentifier,
    pub output: TxOutput,
}

impl UTxO {
    pub fn new(id: UTxOIdentifier, output: TxOutput) -> Self {
        Self { id, output }
    }

    pub fn value(&self) -> &Value {
        &self.output.value
    }

    pub fn address(&self) -> &Address {
        &self.output.address
    }

    /// Holds nothing but lovelace
    pub fn is_pure_lovelace(&self) -> bool {
        !self.output.value.has_native_assets()
    }

    pub fn is_script_locked(&self) -> bool {
        self.output.address.payment_script_hash().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NetworkId;

    #[test]
    fn identifier_display_and_parse() {
        let id = UTxOIdentifier::new(Hash::new([0xab; 32]), 3);
        let text = id.to_string();
        assert!(text.ends_with("#3"));
        assert_eq!(text.parse::<UTxOIdentifier>().unwrap(), id);
        assert!("abcd".parse::<UTxOIdentifier>().is_err());
    }

    #[test]
    fn identifier_as_output_reference() {
        let id = UTxOIdentifier::new(Hash::new([0xcd; 32]), 7);
        let data = id.to_plutus_data();
        assert_eq!(
            data,
            PlutusData::constr(
                0,
                vec![
                    PlutusData::constr(0, vec![PlutusData::bytes([0xcd; 32])]),
                    PlutusData::integer(7),
                ]
            )
        );
        assert_eq!(UTxOIdentifier::from_plutus_data(&data), Some(id));
        let negative = PlutusData::constr(
            0,
            vec![PlutusData::constr(0, vec![PlutusData::bytes([0xcd; 32])]), PlutusData::integer(-1)],
        );
        assert_eq!(UTxOIdentifier::from_plutus_data(&negative), None);
    }

    #[test]
    fn identifiers_order_by_hash_then_index() {
        let a = UTxOIdentifier::new(Hash::new([1; 32]), 9);
        let b = UTxOIdentifier::new(Hash::new([2; 32]), 0);
        let c = UTxOIdentifier::new(Hash::new([2; 32]), 1);
        let mut ids = vec![c, a, b];
        ids.sort();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn inline_datum_grows_output() {
        let address = Address::from_key_hash(NetworkId::Testnet, Hash::new([4; 28]));
        let plain = TxOutput::new(address, Value::from_lovelace(2_000_000));
        let with_datum = plain.clone().with_datum(Datum::Inline(PlutusData::bytes(vec![0; 40])));
        // map(2) + 0 + bytes(29) + 1 + uint32
        assert_eq!(plain.encoded_size(), 1 + 1 + 31 + 1 + 5);
        assert!(with_datum.encoded_size() > plain.encoded_size() + 40);
    }
}
