// CTF common library - main library exports

pub mod address;
pub mod asset;
pub mod configuration;
pub mod crypto;
pub mod hash;
pub mod plutus_data;
pub mod protocol_params;
pub mod script;
pub mod tx;
pub mod utxo;
pub mod validation;

// Flattened re-exports
pub use self::address::{Address, Credential, NetworkId};
pub use self::asset::{AssetDeltas, AssetId, AssetName, Lovelace, Mint, Value};
pub use self::hash::{DatumHash, Hash, KeyHash, PolicyId, ScriptHash, TxHash};
pub use self::plutus_data::PlutusData;
pub use self::protocol_params::{ProtocolParams, SlotConfig};
pub use self::script::{
    Datum, ExUnits, PlutusScript, PlutusVersion, Redeemer, RedeemerPointer, RedeemerTag,
};
pub use self::tx::{SignedTransaction, Transaction, TxBody, VKeyWitness, WitnessSet};
pub use self::utxo::{TxOutput, UTxO, UTxOIdentifier};
