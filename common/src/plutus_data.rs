//! Plutus data: the structured values carried by datums and redeemers

use anyhow::{anyhow, Result};
use minicbor::data::{Tag, Type};

use crate::{crypto::blake2b_256, hash::DatumHash};

/// Byte strings longer than this are written as indefinite chunked strings
const BYTES_CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlutusData {
    /// Constructor application: alternative index and fields
    Constr(u64, Vec<PlutusData>),
    Map(Vec<(PlutusData, PlutusData)>),
    List(Vec<PlutusData>),
    Integer(i64),
    Bytes(Vec<u8>),
}

impl PlutusData {
    pub fn constr(index: u64, fields: Vec<PlutusData>) -> Self {
        PlutusData::Constr(index, fields)
    }

    /// `Constr 0 []`, the encoding of `()` and of the void datum
    pub fn unit() -> Self {
        PlutusData::Constr(0, Vec::new())
    }

    pub fn bytes(bytes: impl AsRef<[u8]>) -> Self {
        PlutusData::Bytes(bytes.as_ref().to_vec())
    }

    pub fn integer(value: i64) -> Self {
        PlutusData::Integer(value)
    }

    pub fn as_constr(&self) -> Option<(u64, &[PlutusData])> {
        match self {
            PlutusData::Constr(index, fields) => Some((*index, fields.as_slice())),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PlutusData::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PlutusData::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PlutusData]> {
        match self {
            PlutusData::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        minicbor::to_vec(self).expect("infallible")
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        minicbor::decode(bytes).map_err(|e| anyhow!("Invalid Plutus data: {e}"))
    }

    /// Datum hash: Blake2b-256 of the CBOR encoding
    pub fn hash(&self) -> DatumHash {
        blake2b_256(&self.to_cbor())
    }
}

fn constr_tag(index: u64) -> Option<u64> {
    match index {
        0..=6 => Some(121 + index),
        7..=127 => Some(1280 + index - 7),
        _ => None,
    }
}

fn constr_index(tag: u64) -> Option<u64> {
    match tag {
        121..=127 => Some(tag - 121),
        1280..=1400 => Some(tag - 1280 + 7),
        _ => None,
    }
}

// Non-empty lists use the indefinite form, matching what the node's own
// serialiser produces so datum hashes agree.
fn encode_list<C, W: minicbor::encode::Write>(
    items: &[PlutusData],
    e: &mut minicbor::Encoder<W>,
    ctx: &mut C,
) -> Result<(), minicbor::encode::Error<W::Error>> {
    if items.is_empty() {
        e.array(0)?;
        return Ok(());
    }
    e.begin_array()?;
    for item in items {
        e.encode_with(item, ctx)?;
    }
    e.end()?;
    Ok(())
}

impl<C> minicbor::Encode<C> for PlutusData {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        match self {
            PlutusData::Constr(index, fields) => match constr_tag(*index) {
                Some(tag) => {
                    e.tag(Tag::new(tag))?;
                    encode_list(fields, e, ctx)?;
                }
                None => {
                    e.tag(Tag::new(102))?;
                    e.array(2)?;
                    e.u64(*index)?;
                    encode_list(fields, e, ctx)?;
                }
            },
            PlutusData::Map(entries) => {
                e.map(entries.len() as u64)?;
                for (key, value) in entries {
                    e.encode_with(key, ctx)?;
                    e.encode_with(value, ctx)?;
                }
            }
            PlutusData::List(items) => encode_list(items, e, ctx)?,
            PlutusData::Integer(value) => {
                e.i64(*value)?;
            }
            PlutusData::Bytes(bytes) if bytes.len() <= BYTES_CHUNK_SIZE => {
                e.bytes(bytes)?;
            }
            PlutusData::Bytes(bytes) => {
                e.begin_bytes()?;
                for chunk in bytes.chunks(BYTES_CHUNK_SIZE) {
                    e.bytes(chunk)?;
                }
                e.end()?;
            }
        }
        Ok(())
    }
}

fn decode_list<'b, C>(
    d: &mut minicbor::Decoder<'b>,
    ctx: &mut C,
) -> Result<Vec<PlutusData>, minicbor::decode::Error> {
    let mut items = Vec::new();
    match d.array()? {
        Some(length) => {
            for _ in 0..length {
                items.push(d.decode_with(ctx)?);
            }
        }
        None => {
            while d.datatype()? != Type::Break {
                items.push(d.decode_with(ctx)?);
            }
            d.skip()?;
        }
    }
    Ok(items)
}

impl<'b, C> minicbor::Decode<'b, C> for PlutusData {
    fn decode(d: &mut minicbor::Decoder<'b>, ctx: &mut C) -> Result<Self, minicbor::decode::Error> {
        match d.datatype()? {
            Type::Tag => {
                let tag = d.tag()?.as_u64();
                if let Some(index) = constr_index(tag) {
                    return Ok(PlutusData::Constr(index, decode_list(d, ctx)?));
                }
                if tag != 102 {
                    return Err(minicbor::decode::Error::message(format!(
                        "Unsupported Plutus data tag {tag}"
                    )));
                }
                d.array()?;
                let index = d.u64()?;
                Ok(PlutusData::Constr(index, decode_list(d, ctx)?))
            }
            Type::Map | Type::MapIndef => {
                let mut entries = Vec::new();
                match d.map()? {
                    Some(length) => {
                        for _ in 0..length {
                            entries.push((d.decode_with(ctx)?, d.decode_with(ctx)?));
                        }
                    }
                    None => {
                        while d.datatype()? != Type::Break {
                            entries.push((d.decode_with(ctx)?, d.decode_with(ctx)?));
                        }
                        d.skip()?;
                    }
                }
                Ok(PlutusData::Map(entries))
            }
            Type::Array | Type::ArrayIndef => Ok(PlutusData::List(decode_list(d, ctx)?)),
            Type::Bytes => Ok(PlutusData::Bytes(d.bytes()?.to_vec())),
            Type::BytesIndef => {
                let mut bytes = Vec::new();
                for chunk in d.bytes_iter()? {
                    bytes.extend_from_slice(chunk?);
                }
                Ok(PlutusData::Bytes(bytes))
            }
            Type::U8 | Type::U16 | Type::U32 | Type::U64 | Type::I8 | Type::I16 | Type::I32
            | Type::I64 => Ok(PlutusData::Integer(d.i64()?)),
            other => Err(minicbor::decode::Error::message(format!(
                "Unexpected type {other} in Plutus data"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, "d87980" ; "first compact tag")]
    #[test_case(6, "d87f80" ; "last compact tag")]
    #[test_case(7, "d9050080" ; "first extended tag")]
    #[test_case(200, "d8668218c880" ; "general form")]
    fn empty_constructor_encoding(index: u64, expected: &str) {
        assert_eq!(hex::encode(PlutusData::constr(index, vec![]).to_cbor()), expected);
    }

    #[test]
    fn fields_use_indefinite_array() {
        let data = PlutusData::constr(0, vec![PlutusData::integer(1)]);
        assert_eq!(hex::encode(data.to_cbor()), "d8799f01ff");
    }

    #[test]
    fn long_bytes_are_chunked_and_decoded() {
        let data = PlutusData::bytes(vec![0xab; 100]);
        let cbor = data.to_cbor();
        assert_eq!(cbor[0], 0x5f);
        assert_eq!(PlutusData::from_cbor(&cbor).unwrap(), data);
    }

    #[test]
    fn nested_data_decodes() {
        let data = PlutusData::constr(
            1,
            vec![
                PlutusData::List(vec![PlutusData::bytes(b"hi"), PlutusData::integer(-5)]),
                PlutusData::Map(vec![(PlutusData::integer(1), PlutusData::unit())]),
            ],
        );
        assert_eq!(PlutusData::from_cbor(&data.to_cbor()).unwrap(), data);
    }

    #[test]
    fn unit_datum_hash() {
        assert_eq!(
            PlutusData::unit().hash().to_string(),
            "923918e403bf43c34b4ef6b48eb2ee04babed17320d8d1b9ff9ad086e86f44ec"
        );
    }
}
