//! CTF levels: the script registry, the level harness and the levels
//! themselves

pub mod blueprint;
pub mod context;
pub mod hello_world;
pub mod multisig_treasury;
pub mod report;
pub mod runner;
pub mod sell_nft;
pub mod tipjar;
pub mod vesting;
pub mod wallet;

use anyhow::{bail, Result};
use ctf_common::configuration::Environment;

pub use blueprint::{Blueprint, BlueprintValidator};
pub use context::{filter_utxos_by_tx_hash, LevelContext};
pub use hello_world::HelloWorld;
pub use multisig_treasury::MultisigTreasury;
pub use report::{CheckEntry, CheckReport};
pub use runner::{run_level, Level, LevelOutcome};
pub use sell_nft::SellNft;
pub use tipjar::TipJar;
pub use vesting::Vesting;
pub use wallet::Wallet;

const LEVEL_NAMES: [&str; 5] = [
    "00_hello_world",
    "01_sell_nft",
    "02_vesting",
    "03_multisig_treasury",
    "04_tipjar",
];

pub fn level_names() -> &'static [&'static str] {
    &LEVEL_NAMES
}

/// Run a level by its name or its number (`4`, `04`)
pub async fn run_named_level(name: &str, environment: &Environment) -> Result<LevelOutcome> {
    let number = format!("{name:0>2}");
    let name = LEVEL_NAMES
        .iter()
        .find(|level| **level == name || level.split('_').next() == Some(number.as_str()))
        .copied();
    match name {
        Some("00_hello_world") => run_level(&HelloWorld, environment).await,
        Some("01_sell_nft") => run_level(&SellNft, environment).await,
        Some("02_vesting") => run_level(&Vesting, environment).await,
        Some("03_multisig_treasury") => run_level(&MultisigTreasury, environment).await,
        Some("04_tipjar") => run_level(&TipJar, environment).await,
        _ => bail!("Unknown level, choose one of: {}", LEVEL_NAMES.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_levels() {
        assert_eq!(
            level_names(),
            [
                HelloWorld.name(),
                SellNft.name(),
                Vesting.name(),
                MultisigTreasury.name(),
                TipJar.name()
            ]
        );
    }

    #[tokio::test]
    async fn unknown_level_is_an_error() {
        let err = run_named_level("99_nope", &Environment::default()).await.unwrap_err();
        assert!(err.to_string().starts_with("Unknown level"));
    }
}
