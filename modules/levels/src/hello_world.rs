//! Level 00: lock 10 ADA at a validator and unlock it with the right redeemer

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use ctf_common::{Lovelace, PlutusData, PlutusScript, UTxO, Value};
use ctf_module_chain_backend::{ScriptContext, ScriptEvaluator};
use ctf_module_tx_builder::OutputDatum;

use crate::{
    context::{filter_utxos_by_tx_hash, LevelContext},
    report::CheckReport,
    runner::Level,
};

pub const HELLO_WORLD_VALIDATOR: &str = "hello_world.hello_world";
pub const GREETING: &str = "Hello, World!";

const LOCKED_LOVELACE: Lovelace = 10_000_000;
const MAX_SPENT_LOVELACE: Lovelace = 4_000_000;

/// `Constr 0 [bytes msg]`
pub fn hello_redeemer(msg: &str) -> PlutusData {
    PlutusData::constr(0, vec![PlutusData::bytes(msg)])
}

/// Accepts a spend only with the greeting redeemer
pub struct HelloWorldValidator;

impl ScriptEvaluator for HelloWorldValidator {
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String> {
        match context.redeemer.as_constr() {
            Some((0, [msg])) if msg.as_bytes() == Some(GREETING.as_bytes()) => Ok(()),
            _ => Err("Redeemer message is not the expected greeting".to_string()),
        }
    }
}

pub struct HelloWorldGame {
    pub validator: PlutusScript,
    pub script_utxo: UTxO,

    /// Wallet balance before setup
    pub original_balance: Lovelace,
}

pub struct HelloWorld;

#[async_trait]
impl Level for HelloWorld {
    type GameData = HelloWorldGame;
    type TestData = ();

    fn name(&self) -> &'static str {
        "00_hello_world"
    }

    fn evaluators(&self) -> HashMap<String, Arc<dyn ScriptEvaluator>> {
        HashMap::from([(
            HELLO_WORLD_VALIDATOR.to_string(),
            Arc::new(HelloWorldValidator) as Arc<dyn ScriptEvaluator>,
        )])
    }

    async fn setup(&self, ctx: &mut LevelContext) -> Result<HelloWorldGame> {
        println!("=== SETUP IN PROGRESS ===");
        let original_balance = ctx.wallet_balance().await?;
        let validator = ctx.validator(HELLO_WORLD_VALIDATOR, &[]).await?;
        let address = ctx.validator_address(&validator);

        println!("Creating an UTxO at the smart contract script address...");
        let draft = ctx.new_tx().pay_to_contract(
            &address,
            OutputDatum::Inline(PlutusData::unit()),
            Value::from_lovelace(LOCKED_LOVELACE),
        );
        let tx_hash = ctx.submit_and_confirm(draft).await?;
        println!("10 ADA locked into the contract at:{}", ctx.tx_details(&tx_hash));

        let script_utxo = filter_utxos_by_tx_hash(ctx.utxos_at(&address).await?, &tx_hash)
            .into_iter()
            .next()
            .context("Locked UTxO not found at the script address")?;
        println!("=== SETUP WAS SUCCESSFUL ===");

        Ok(HelloWorldGame {
            validator,
            script_utxo,
            original_balance,
        })
    }

    async fn play(&self, ctx: &mut LevelContext, game: &HelloWorldGame) -> Result<()> {
        println!("Building a transaction to unlock the locked script UTxO");
        let draft = ctx.new_tx().attach_spending(
            game.script_utxo.clone(),
            &game.validator,
            hello_redeemer(GREETING),
        );
        let tx_hash = ctx.submit_and_confirm(draft).await?;
        println!(
            "UTxO was successfuly unlocked with transaction {tx_hash}\n\t{}",
            ctx.explorer_link(&tx_hash)
        );
        Ok(())
    }

    async fn test(
        &self,
        ctx: &mut LevelContext,
        game: &HelloWorldGame,
        _test: &(),
        report: &mut CheckReport,
    ) -> Result<()> {
        let end_balance = ctx.wallet_balance().await?;
        let spent = game.original_balance.saturating_sub(end_balance);
        report.check(
            spent <= MAX_SPENT_LOVELACE,
            "you unlocked the ADA",
            "you spent too much ADA",
        );
        Ok(())
    }

    fn completion_message(&self) -> String {
        "\nCongratulations on the successful completion of the Level 00: Hello World!\nGood luck with the next level."
            .to_string()
    }
}
