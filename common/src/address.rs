//! Shelley-era payment addresses

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::{
    hash::{Hash, KeyHash, ScriptHash},
    plutus_data::PlutusData,
};

/// Address network identifier
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Mainnet,

    #[default]
    Testnet,
}

impl NetworkId {
    fn header_bits(&self) -> u8 {
        match self {
            NetworkId::Mainnet => 1,
            NetworkId::Testnet => 0,
        }
    }

    fn hrp(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "addr",
            NetworkId::Testnet => "addr_test",
        }
    }
}

/// Payment or stake credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Credential {
    /// Hash of a verification key
    Key(KeyHash),

    /// Hash of a script
    Script(ScriptHash),
}

impl Credential {
    pub fn hash(&self) -> &Hash<28> {
        match self {
            Credential::Key(hash) | Credential::Script(hash) => hash,
        }
    }

    fn is_script(&self) -> bool {
        matches!(self, Credential::Script(_))
    }

    /// `Constr 0 [key hash]` or `Constr 1 [script hash]`
    pub fn to_plutus_data(&self) -> PlutusData {
        let index = self.is_script() as u64;
        PlutusData::constr(index, vec![PlutusData::bytes(self.hash())])
    }

    pub fn from_plutus_data(data: &PlutusData) -> Option<Self> {
        let (index, [hash]) = data.as_constr()? else {
            return None;
        };
        let hash = Hash::try_from(hash.as_bytes()?).ok()?;
        match index {
            0 => Some(Credential::Key(hash)),
            1 => Some(Credential::Script(hash)),
            _ => None,
        }
    }
}

/// A base (payment + stake) or enterprise (payment only) address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub network: NetworkId,
    pub payment: Credential,
    pub stake: Option<Credential>,
}

impl Address {
    /// Enterprise address locked by a key
    pub fn from_key_hash(network: NetworkId, key_hash: KeyHash) -> Self {
        Self {
            network,
            payment: Credential::Key(key_hash),
            stake: None,
        }
    }

    /// Enterprise address locked by a script
    pub fn from_script_hash(network: NetworkId, script_hash: ScriptHash) -> Self {
        Self {
            network,
            payment: Credential::Script(script_hash),
            stake: None,
        }
    }

    /// Key hash of the payment part, if the address is key-locked
    pub fn payment_key_hash(&self) -> Option<KeyHash> {
        match self.payment {
            Credential::Key(hash) => Some(hash),
            Credential::Script(_) => None,
        }
    }

    /// Script hash of the payment part, if the address is script-locked
    pub fn payment_script_hash(&self) -> Option<ScriptHash> {
        match self.payment {
            Credential::Script(hash) => Some(hash),
            Credential::Key(_) => None,
        }
    }

    /// Binary form: header byte, payment hash, optional stake hash
    pub fn to_bytes(&self) -> Vec<u8> {
        let payment_bits = self.payment.is_script() as u8;
        let delegation_bits = match &self.stake {
            Some(stake) => (stake.is_script() as u8) << 1,
            None => 0b110,
        };
        let header = self.network.header_bits() | ((payment_bits | delegation_bits) << 4);

        let mut data = vec![header];
        data.extend_from_slice(self.payment.hash().as_ref());
        if let Some(stake) = &self.stake {
            data.extend_from_slice(stake.hash().as_ref());
        }
        data
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let Some(header) = data.first() else {
            bail!("Empty address data");
        };
        let network = match header & 0x0f {
            0 => NetworkId::Testnet,
            1 => NetworkId::Mainnet,
            other => bail!("Unknown network id {other}"),
        };
        let kind = header >> 4;

        let hash_at = |offset: usize| -> Result<Hash<28>> {
            data.get(offset..offset + 28)
                .ok_or_else(|| anyhow!("Address too short: {} bytes", data.len()))
                .and_then(|slice| Ok(Hash::try_from(slice)?))
        };
        let credential = |is_script: bool, hash: Hash<28>| match is_script {
            true => Credential::Script(hash),
            false => Credential::Key(hash),
        };

        let (payment, stake, expected_len) = match kind {
            0..=3 => (
                credential(kind & 0b01 != 0, hash_at(1)?),
                Some(credential(kind & 0b10 != 0, hash_at(29)?)),
                57,
            ),
            6 | 7 => (credential(kind == 7, hash_at(1)?), None, 29),
            other => bail!("Unsupported address type {other}"),
        };
        if data.len() != expected_len {
            bail!("Bad address length: {}", data.len());
        }

        Ok(Self {
            network,
            payment,
            stake,
        })
    }

    /// On-chain form: `Constr 0 [payment, stake]` where a stake part is
    /// `Constr 0 [Constr 0 [credential]]` and its absence is `Constr 1 []`.
    /// The network is not part of it.
    pub fn to_plutus_data(&self) -> PlutusData {
        let stake = match &self.stake {
            Some(stake) => PlutusData::constr(
                0,
                vec![PlutusData::constr(0, vec![stake.to_plutus_data()])],
            ),
            None => PlutusData::constr(1, vec![]),
        };
        PlutusData::constr(0, vec![self.payment.to_plutus_data(), stake])
    }

    pub fn from_plutus_data(data: &PlutusData, network: NetworkId) -> Option<Self> {
        let (0, [payment, stake]) = data.as_constr()? else {
            return None;
        };
        let stake = match stake.as_constr()? {
            (1, []) => None,
            (0, [inline]) => match inline.as_constr()? {
                (0, [credential]) => Some(Credential::from_plutus_data(credential)?),
                _ => return None,
            },
            _ => return None,
        };
        Some(Self {
            network,
            payment: Credential::from_plutus_data(payment)?,
            stake,
        })
    }

    /// Convert to addr1xxx / addr_test1xxx form
    pub fn to_bech32(&self) -> Result<String> {
        let hrp = bech32::Hrp::parse(self.network.hrp())?;
        Ok(bech32::encode::<bech32::Bech32>(hrp, &self.to_bytes())?)
    }

    /// Read from addr1xxx / addr_test1xxx form
    pub fn from_bech32(text: &str) -> Result<Self> {
        let (hrp, data) = bech32::decode(text)?;
        let address = Self::from_bytes(&data)?;
        if hrp.as_str() != address.network.hrp() {
            bail!("Prefix {} does not match the address network", hrp.as_str());
        }
        Ok(address)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_bech32() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str(&hex::encode(self.to_bytes())),
        }
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bech32(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_bech32(&s).map_err(serde::de::Error::custom)
    }
}

impl<C> minicbor::Encode<C> for Address {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.to_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_hash() -> KeyHash {
        "1c8d5146716def9ac9aa4968a51e0175cea4e483cb328e48403f0df5".parse().unwrap()
    }

    #[test]
    fn enterprise_key_address_roundtrips() {
        let address = Address::from_key_hash(NetworkId::Testnet, key_hash());
        let text = address.to_string();
        assert!(text.starts_with("addr_test1v"));
        assert_eq!(Address::from_bech32(&text).unwrap(), address);
    }

    #[test]
    fn enterprise_script_address_header() {
        let address = Address::from_script_hash(NetworkId::Mainnet, key_hash());
        let bytes = address.to_bytes();
        assert_eq!(bytes[0], 0x71);
        assert_eq!(bytes.len(), 29);
        assert!(address.to_string().starts_with("addr1w"));
    }

    #[test]
    fn base_address_roundtrips() {
        let address = Address {
            network: NetworkId::Mainnet,
            payment: Credential::Key(key_hash()),
            stake: Some(Credential::Script(KeyHash::new([9u8; 28]))),
        };
        let bytes = address.to_bytes();
        assert_eq!(bytes[0], 0x21);
        assert_eq!(Address::from_bytes(&bytes).unwrap(), address);
    }

    #[test]
    fn plutus_data_form() {
        let enterprise = Address::from_key_hash(NetworkId::Testnet, key_hash());
        let data = enterprise.to_plutus_data();
        assert_eq!(
            data,
            PlutusData::constr(
                0,
                vec![
                    PlutusData::constr(0, vec![PlutusData::bytes(key_hash())]),
                    PlutusData::constr(1, vec![]),
                ]
            )
        );
        assert_eq!(Address::from_plutus_data(&data, NetworkId::Testnet), Some(enterprise));

        let base = Address {
            network: NetworkId::Mainnet,
            payment: Credential::Script(key_hash()),
            stake: Some(Credential::Key(KeyHash::new([9u8; 28]))),
        };
        assert_eq!(
            Address::from_plutus_data(&base.to_plutus_data(), NetworkId::Mainnet),
            Some(base)
        );
        assert_eq!(Address::from_plutus_data(&PlutusData::unit(), NetworkId::Testnet), None);
    }

    #[test]
    fn rejects_mismatched_prefix() {
        let address = Address::from_key_hash(NetworkId::Mainnet, key_hash());
        let hrp = bech32::Hrp::parse("addr_test").unwrap();
        let text = bech32::encode::<bech32::Bech32>(hrp, &address.to_bytes()).unwrap();
        assert!(Address::from_bech32(&text).is_err());
    }
}
