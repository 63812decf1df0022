use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use ctf_common::{configuration::Environment, PlutusData, Value};
use ctf_module_chain_backend::ScriptEvaluator;
use ctf_module_levels::{
    filter_utxos_by_tx_hash,
    multisig_treasury::{MultisigDatum, MultisigRedeemer, MultisigTreasuryGame, TreasuryDatum},
    run_level, run_named_level,
    sell_nft::{SellNftDatum, SellNftGame},
    tipjar::{tip_draft, TipJarDatum, TipJarGame, TipJarTest},
    vesting::{VestingGame, MINUTE_MS},
    CheckReport, HelloWorld, Level, LevelContext, LevelOutcome, MultisigTreasury, SellNft, TipJar,
    Vesting,
};
use ctf_module_tx_builder::OutputDatum;

/// Bytes kept free below the size limit when sizing the message
const SIZE_SLACK: usize = 32;

fn emulator_only() -> Environment {
    Environment {
        use_emulator: true,
        use_testnet: false,
        ..Default::default()
    }
}

/// A level with its play phase replaced by a solution
macro_rules! solved_level {
    ($solved:ident, $level:ident, $solution:ident) => {
        struct $solved;

        #[async_trait]
        impl Level for $solved {
            type GameData = <$level as Level>::GameData;
            type TestData = <$level as Level>::TestData;

            fn name(&self) -> &'static str {
                $level.name()
            }

            fn evaluators(&self) -> HashMap<String, Arc<dyn ScriptEvaluator>> {
                $level.evaluators()
            }

            async fn setup(&self, ctx: &mut LevelContext) -> Result<Self::GameData> {
                $level.setup(ctx).await
            }

            async fn play(
                &self,
                ctx: &mut LevelContext,
                game: &Self::GameData,
            ) -> Result<Self::TestData> {
                $solution(ctx, game).await
            }

            async fn test(
                &self,
                ctx: &mut LevelContext,
                game: &Self::GameData,
                test: &Self::TestData,
                report: &mut CheckReport,
            ) -> Result<()> {
                $level.test(ctx, game, test, report).await
            }

            fn completion_message(&self) -> String {
                $level.completion_message()
            }
        }
    };
}

/// Spend both listings in one transaction with a single payment covering
/// the higher price
async fn buy_both_nfts(ctx: &LevelContext, game: &SellNftGame) -> Result<()> {
    let price = game
        .script_utxos
        .iter()
        .map(|utxo| SellNftDatum::of_utxo(utxo).map(|datum| datum.price))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .max()
        .context("No listings")?;
    let draft = ctx
        .new_tx()
        .collect_from(game.script_utxos.clone(), Some(PlutusData::unit()))
        .attach_spending_validator(&game.validator)
        .pay_to_address(&game.seller, Value::from_lovelace(price));
    ctx.submit_and_confirm(draft).await?;
    Ok(())
}

/// Collect right away with a validity interval ending after the lock
async fn collect_vesting_early(ctx: &LevelContext, game: &VestingGame) -> Result<()> {
    let now = ctx.now_ms().await?;
    let draft = ctx
        .new_tx()
        .attach_spending(game.script_utxo.clone(), &game.validator, PlutusData::unit())
        .add_signer(ctx.wallet().key_hash())
        .valid_from(now.saturating_sub(5 * MINUTE_MS))
        .valid_to(game.lock_until + 5 * MINUTE_MS);
    ctx.submit_and_confirm(draft).await?;
    Ok(())
}

/// Pay a fully signed multisig datum releasing the whole treasury to the
/// multisig address, then spend it together with the treasury
async fn drain_treasury_with_forged_multisig(
    ctx: &LevelContext,
    game: &MultisigTreasuryGame,
) -> Result<()> {
    let forged = MultisigDatum {
        release_value: game.treasury_funds,
        beneficiary: ctx.wallet_address().clone(),
        required_signers: game.treasury_owners.clone(),
        signed_users: game.treasury_owners.clone(),
    };
    let draft = ctx.new_tx().pay_to_contract(
        &game.multisig_address,
        OutputDatum::Inline(forged.to_data()),
        Value::default(),
    );
    let forge_tx = ctx.submit_and_confirm(draft).await?;
    let forged_utxo = filter_utxos_by_tx_hash(ctx.utxos_at(&game.multisig_address).await?, &forge_tx)
        .into_iter()
        .next()
        .context("Forged multisig UTxO not found")?;

    let emptied = TreasuryDatum {
        value: 0,
        owners: game.treasury_owners.clone(),
    };
    let draft = ctx
        .new_tx()
        .attach_spending(forged_utxo, &game.multisig_validator, MultisigRedeemer::Use.to_data())
        .attach_spending(game.treasury_utxo.clone(), &game.treasury_validator, PlutusData::unit())
        .pay_to_contract(
            &game.treasury_address,
            OutputDatum::Inline(emptied.to_data()),
            Value::default(),
        );
    ctx.submit_and_confirm(draft).await?;
    Ok(())
}

/// Tip with one message sized so the transaction almost reaches the size
/// limit. Any later tip must carry this message plus another one.
async fn fill_jar(ctx: &LevelContext, game: &TipJarGame) -> Result<TipJarTest> {
    let datum = TipJarDatum::of_utxo(&game.script_utxo)?;
    let lovelace = game.script_utxo.output.value.lovelace() + 1_000_000;
    let max_size = ctx.params().max_tx_size as usize;

    let mut length = 1_000;
    for _ in 0..4 {
        let message = vec![b'A'; length];
        let draft = tip_draft(ctx, game, &game.script_utxo, &datum.with_tip(&message), lovelace);
        let tx = ctx.complete(draft).await?;
        let size = tx.size_with_signers(1);

        if size <= max_size && max_size - size <= SIZE_SLACK * 2 {
            let last_tx = ctx.sign_and_submit(tx).await?;
            ctx.await_tx(&last_tx).await?;
            return Ok(TipJarTest { last_tx });
        }
        // Chunked byte strings spend 2 header bytes per 64 bytes of data
        let room = max_size as i64 - size as i64 - SIZE_SLACK as i64;
        length = (length as i64 + room * 64 / 66).max(1) as usize;
    }
    bail!("Could not size the tip message to the transaction limit")
}

solved_level!(SolvedSellNft, SellNft, buy_both_nfts);
solved_level!(SolvedVesting, Vesting, collect_vesting_early);
solved_level!(SolvedMultisigTreasury, MultisigTreasury, drain_treasury_with_forged_multisig);
solved_level!(SolvedTipJar, TipJar, fill_jar);

#[tokio::test]
async fn hello_world_passes_on_emulator() {
    let outcome = run_level(&HelloWorld, &emulator_only()).await.unwrap();
    assert_eq!(
        outcome,
        LevelOutcome {
            emulator: Some(true),
            testnet: None
        }
    );
}

#[tokio::test]
async fn sell_nft_happy_path_buys_only_one() {
    let outcome = run_level(&SellNft, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(false));
}

#[tokio::test]
async fn sell_nft_double_satisfaction_passes() {
    let outcome = run_level(&SolvedSellNft, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(true));
}

#[tokio::test]
async fn vesting_happy_path_waits_too_long() {
    let outcome = run_level(&Vesting, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(false));
}

#[tokio::test]
async fn vesting_open_ended_interval_passes() {
    let outcome = run_level(&SolvedVesting, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(true));
}

#[tokio::test]
async fn multisig_happy_path_cannot_release() {
    let outcome = run_level(&MultisigTreasury, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(false));
}

#[tokio::test]
async fn multisig_forged_signatures_pass() {
    let outcome = run_level(&SolvedMultisigTreasury, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(true));
}

#[tokio::test]
async fn tipjar_happy_path_does_not_solve_the_level() {
    let outcome = run_level(&TipJar, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(false));
    assert!(!outcome.passed());
}

#[tokio::test]
async fn tipjar_size_limit_solution_passes() {
    let outcome = run_level(&SolvedTipJar, &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(true));
    assert!(outcome.passed());
}

#[tokio::test]
async fn levels_run_by_number() {
    let outcome = run_named_level("0", &emulator_only()).await.unwrap();
    assert!(outcome.passed());
    let outcome = run_named_level("01", &emulator_only()).await.unwrap();
    assert_eq!(outcome.emulator, Some(false));
}
