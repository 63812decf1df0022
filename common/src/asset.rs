//! Multi-asset value bookkeeping
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    ops::AddAssign,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{hash::PolicyId, validation::ValueError};

pub type Lovelace = u64;

/// Quantities of one policy's assets, keyed by name
pub type PolicyAssets = BTreeMap<AssetName, u64>;

/// Signed mint (positive) / burn (negative) quantities under a single policy
pub type AssetDeltas = BTreeMap<AssetName, i64>;

/// Mint field of a transaction
pub type Mint = BTreeMap<PolicyId, AssetDeltas>;

/// Asset name, at most 32 bytes
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetName {
    len: u8,
    bytes: [u8; 32],
}

impl AssetName {
    pub fn new(data: &[u8]) -> Option<Self> {
        if data.len() > 32 {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            len: data.len() as u8,
            bytes,
        })
    }

    /// Asset name from UTF-8 text, as tokens are usually named
    pub fn from_text(text: &str) -> Option<Self> {
        Self::new(text.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Debug for AssetName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AssetName({})", hex::encode(self.as_slice()))
    }
}

impl Display for AssetName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.as_slice()) {
            Ok(text) if text.chars().all(|c| c.is_ascii_graphic()) => f.write_str(text),
            _ => f.write_str(&hex::encode(self.as_slice())),
        }
    }
}

impl Serialize for AssetName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.as_slice()))
    }
}

impl<'de> Deserialize<'de> for AssetName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::new(&bytes).ok_or_else(|| serde::de::Error::custom("asset name longer than 32 bytes"))
    }
}

/// Identifier of one asset class
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetId {
    Lovelace,
    Native(PolicyId, AssetName),
}

impl Display for AssetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Lovelace => f.write_str("lovelace"),
            AssetId::Native(policy, name) => write!(f, "{policy}.{name}"),
        }
    }
}

/// Value (lovelace + multiasset)
///
/// Zero quantities are never stored, so two values holding the same non-zero
/// quantities compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    lovelace: Lovelace,
    assets: BTreeMap<PolicyId, PolicyAssets>,
}

impl Value {
    pub fn new(
        lovelace: Lovelace,
        assets: impl IntoIterator<Item = (PolicyId, AssetName, u64)>,
    ) -> Self {
        let mut value = Self::from_lovelace(lovelace);
        for (policy, name, quantity) in assets {
            value.insert(AssetId::Native(policy, name), quantity);
        }
        value
    }

    pub fn from_lovelace(lovelace: Lovelace) -> Self {
        Self {
            lovelace,
            assets: BTreeMap::new(),
        }
    }

    /// Builder-style addition of a single native asset
    pub fn with_asset(mut self, policy: PolicyId, name: AssetName, quantity: u64) -> Self {
        let current = self.quantity_of(&AssetId::Native(policy, name));
        self.insert(
            AssetId::Native(policy, name),
            current.saturating_add(quantity),
        );
        self
    }

    pub fn lovelace(&self) -> Lovelace {
        self.lovelace
    }

    pub fn set_lovelace(&mut self, lovelace: Lovelace) {
        self.lovelace = lovelace;
    }

    pub fn quantity_of(&self, asset: &AssetId) -> u64 {
        match asset {
            AssetId::Lovelace => self.lovelace,
            AssetId::Native(policy, name) => self
                .assets
                .get(policy)
                .and_then(|assets| assets.get(name))
                .copied()
                .unwrap_or(0),
        }
    }

    /// Native assets grouped by policy, in canonical order
    pub fn policies(&self) -> impl Iterator<Item = (&PolicyId, &PolicyAssets)> {
        self.assets.iter()
    }

    /// All non-zero native assets in canonical order
    pub fn native_assets(&self) -> impl Iterator<Item = (AssetId, u64)> + '_ {
        self.assets.iter().flat_map(|(policy, assets)| {
            assets.iter().map(|(name, quantity)| (AssetId::Native(*policy, *name), *quantity))
        })
    }

    /// Every asset class with a non-zero quantity, lovelace first
    pub fn entries(&self) -> impl Iterator<Item = (AssetId, u64)> + '_ {
        let lovelace = (self.lovelace > 0).then_some((AssetId::Lovelace, self.lovelace));
        lovelace.into_iter().chain(self.native_assets())
    }

    pub fn has_native_assets(&self) -> bool {
        !self.assets.is_empty()
    }

    /// True iff all quantities are zero
    pub fn is_zero(&self) -> bool {
        self.lovelace == 0 && self.assets.is_empty()
    }

    /// The same value with every native asset dropped
    pub fn only_lovelace(&self) -> Self {
        Self::from_lovelace(self.lovelace)
    }

    /// Union of asset keys, summing quantities
    pub fn checked_add(&self, other: &Value) -> Result<Value, ValueError> {
        let mut result = self.clone();
        for (asset, quantity) in other.entries() {
            let sum = result
                .quantity_of(&asset)
                .checked_add(quantity)
                .ok_or(ValueError::Overflow { asset })?;
            result.insert(asset, sum);
        }
        Ok(result)
    }

    /// Fails with `NegativeValue` if any quantity in `other` exceeds ours
    pub fn checked_sub(&self, other: &Value) -> Result<Value, ValueError> {
        let mut result = self.clone();
        for (asset, quantity) in other.entries() {
            let available = result.quantity_of(&asset);
            let remaining =
                available.checked_sub(quantity).ok_or(ValueError::NegativeValue {
                    asset,
                    available,
                    required: quantity,
                })?;
            result.insert(asset, remaining);
        }
        Ok(result)
    }

    /// True if every quantity in `other` is matched or exceeded here
    pub fn covers(&self, other: &Value) -> bool {
        other.entries().all(|(asset, quantity)| self.quantity_of(&asset) >= quantity)
    }

    /// What would have to be added to this value for it to cover `other`
    pub fn saturating_deficit(&self, other: &Value) -> Value {
        let mut deficit = Value::default();
        for (asset, quantity) in other.entries() {
            deficit.insert(asset, quantity.saturating_sub(self.quantity_of(&asset)));
        }
        deficit
    }

    /// Apply mint (add) and burn (subtract) deltas
    pub fn apply_mint(&self, mint: &Mint) -> Result<Value, ValueError> {
        let minted = minted_value(mint);
        let burnt = burnt_value(mint);
        self.checked_add(&minted)?.checked_sub(&burnt)
    }

    /// Sum of many values, saturating
    pub fn sum<'a>(values: impl IntoIterator<Item = &'a Value>) -> Value {
        let mut total = Value::default();
        for value in values {
            total += value;
        }
        total
    }

    fn insert(&mut self, asset: AssetId, quantity: u64) {
        match asset {
            AssetId::Lovelace => self.lovelace = quantity,
            AssetId::Native(policy, name) => {
                if quantity == 0 {
                    if let Some(assets) = self.assets.get_mut(&policy) {
                        assets.remove(&name);
                        if assets.is_empty() {
                            self.assets.remove(&policy);
                        }
                    }
                } else {
                    self.assets.entry(policy).or_default().insert(name, quantity);
                }
            }
        }
    }
}

impl AddAssign<&Value> for Value {
    fn add_assign(&mut self, other: &Value) {
        for (asset, quantity) in other.entries() {
            let sum = self.quantity_of(&asset).saturating_add(quantity);
            self.insert(asset, sum);
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Value {{ lovelace: {}", self.lovelace)?;
        if self.has_native_assets() {
            f.write_str(", assets: {")?;
            for (i, (policy, assets)) in self.assets.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{policy}: {{")?;
                for (j, (name, quantity)) in assets.iter().enumerate() {
                    if j > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {quantity}")?;
                }
                f.write_str("}")?;
            }
            f.write_str("}")?;
        }
        f.write_str(" }")
    }
}

/// `coin / [coin, multiasset<uint>]`
impl<C> minicbor::Encode<C> for Value {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if !self.has_native_assets() {
            e.u64(self.lovelace)?;
            return Ok(());
        }
        e.array(2)?.u64(self.lovelace)?;
        e.map(self.assets.len() as u64)?;
        for (policy, assets) in &self.assets {
            e.encode_with(policy, ctx)?;
            e.map(assets.len() as u64)?;
            for (name, quantity) in assets {
                e.bytes(name.as_slice())?.u64(*quantity)?;
            }
        }
        Ok(())
    }
}

/// Positive part of a mint field
pub fn minted_value(mint: &Mint) -> Value {
    let mut value = Value::default();
    for (policy, deltas) in mint {
        for (name, delta) in deltas {
            if *delta > 0 {
                value = value.with_asset(*policy, *name, delta.unsigned_abs());
            }
        }
    }
    value
}

/// Negative part of a mint field, as positive quantities
pub fn burnt_value(mint: &Mint) -> Value {
    let mut value = Value::default();
    for (policy, deltas) in mint {
        for (name, delta) in deltas {
            if *delta < 0 {
                value = value.with_asset(*policy, *name, delta.unsigned_abs());
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(byte: u8) -> PolicyId {
        PolicyId::new([byte; 28])
    }

    fn token(text: &str) -> AssetName {
        AssetName::from_text(text).unwrap()
    }

    #[test]
    fn add_unions_keys_and_sums() {
        let a = Value::from_lovelace(5).with_asset(policy(1), token("A"), 3);
        let b = Value::from_lovelace(7)
            .with_asset(policy(1), token("A"), 2)
            .with_asset(policy(2), token("B"), 1);
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.lovelace(), 12);
        assert_eq!(sum.quantity_of(&AssetId::Native(policy(1), token("A"))), 5);
        assert_eq!(sum.quantity_of(&AssetId::Native(policy(2), token("B"))), 1);
    }

    #[test]
    fn subtract_fails_when_negative() {
        let a = Value::from_lovelace(10).with_asset(policy(1), token("A"), 1);
        let b = Value::from_lovelace(1).with_asset(policy(1), token("A"), 2);
        let err = a.checked_sub(&b).unwrap_err();
        assert_eq!(
            err,
            ValueError::NegativeValue {
                asset: AssetId::Native(policy(1), token("A")),
                available: 1,
                required: 2,
            }
        );
    }

    #[test]
    fn subtract_undoes_add() {
        let v = Value::from_lovelace(1_000).with_asset(policy(3), token("X"), 9);
        let w = Value::from_lovelace(250)
            .with_asset(policy(3), token("X"), 1)
            .with_asset(policy(4), token("Y"), 40);
        assert_eq!(v.checked_add(&w).unwrap().checked_sub(&w).unwrap(), v);
    }

    #[test]
    fn zero_quantities_are_dropped() {
        let v = Value::from_lovelace(0).with_asset(policy(1), token("A"), 4);
        let empty = v.checked_sub(&v).unwrap();
        assert!(empty.is_zero());
        assert_eq!(empty, Value::default());
        assert!(Value::default().is_zero());
    }

    #[test]
    fn overflow_is_reported() {
        let a = Value::from_lovelace(u64::MAX);
        assert_eq!(
            a.checked_add(&Value::from_lovelace(1)),
            Err(ValueError::Overflow {
                asset: AssetId::Lovelace
            })
        );
    }

    #[test]
    fn deficit_and_covers() {
        let have = Value::from_lovelace(10).with_asset(policy(1), token("A"), 1);
        let want = Value::from_lovelace(4).with_asset(policy(1), token("A"), 3);
        assert!(!have.covers(&want));
        let deficit = have.saturating_deficit(&want);
        assert_eq!(deficit, Value::default().with_asset(policy(1), token("A"), 2));
        assert!(have.checked_add(&deficit).unwrap().covers(&want));
    }

    #[test]
    fn mint_and_burn() {
        let mut mint = Mint::new();
        mint.entry(policy(1)).or_default().insert(token("A"), 5);
        mint.entry(policy(1)).or_default().insert(token("B"), -1);
        let start = Value::from_lovelace(2).with_asset(policy(1), token("B"), 1);
        let after = start.apply_mint(&mint).unwrap();
        assert_eq!(after, Value::from_lovelace(2).with_asset(policy(1), token("A"), 5));
        assert!(Value::default().apply_mint(&mint).is_err());
    }

    #[test]
    fn lovelace_only_encodes_as_uint() {
        let bytes = minicbor::to_vec(Value::from_lovelace(10)).unwrap();
        assert_eq!(bytes, vec![0x0a]);
    }
}
