//! Level 04: a tip jar whose datum grows with every tip. The level is solved
//! when no one else can tip any more.

use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use ctf_common::{
    Address, Datum, KeyHash, Lovelace, PlutusData, PlutusScript, Transaction, TxHash, UTxO, Value,
};
use ctf_module_chain_backend::{ScriptContext, ScriptEvaluator};
use ctf_module_tx_builder::{OutputDatum, TransactionDraft};
use tracing::{debug, info};

use crate::{
    context::{filter_utxos_by_tx_hash, LevelContext},
    report::CheckReport,
    runner::Level,
};

pub const TIPJAR_VALIDATOR: &str = "tipjar.tipjar";
pub const TIPJAR_OWNER: &str = "1c8d5146716def9ac9aa4968a51e0175cea4e483cb328e48403f0df5";

const INITIAL_LOVELACE: Lovelace = 5_000_000;
const FOLLOW_UP_TIP: Lovelace = 6_000_000;
const MAX_SPENT_LOVELACE: Lovelace = 100_000_000;
const FOLLOW_UP_MESSAGE: &str = "Another message for you. We appreciate this CTF very much and hope no one can break it, so that we can tip you many more times in the future. :)";

const PLAYER_TIP: Lovelace = 10_000_000;
const PLAYER_MESSAGE: &str = "Thank you!";

/// `Constr 0 [owner, [messages]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipJarDatum {
    pub owner: Vec<u8>,
    pub messages: Vec<Vec<u8>>,
}

impl TipJarDatum {
    pub fn new(owner: Vec<u8>, messages: Vec<Vec<u8>>) -> Self {
        Self { owner, messages }
    }

    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::bytes(&self.owner),
                PlutusData::List(self.messages.iter().map(PlutusData::bytes).collect()),
            ],
        )
    }

    pub fn from_data(data: &PlutusData) -> Option<Self> {
        let (0, [owner, messages]) = data.as_constr()? else {
            return None;
        };
        let messages = messages
            .as_list()?
            .iter()
            .map(|message| message.as_bytes().map(<[u8]>::to_vec))
            .collect::<Option<Vec<_>>>()?;
        Some(Self::new(owner.as_bytes()?.to_vec(), messages))
    }

    /// Datum of a jar UTxO; only inline datums are used by this level
    pub fn of_utxo(utxo: &UTxO) -> Result<Self> {
        match &utxo.output.datum {
            Some(Datum::Inline(data)) => {
                Self::from_data(data).context("UTxO datum is not a tip jar datum")
            }
            _ => bail!("UTxO object does not contain datum."),
        }
    }

    /// The datum after a tip carrying `message`
    pub fn with_tip(&self, message: &[u8]) -> Self {
        let mut messages = vec![message.to_vec()];
        messages.extend(self.messages.iter().cloned());
        Self::new(self.owner.clone(), messages)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipJarRedeemer {
    Claim,
    AddTip,
}

impl TipJarRedeemer {
    pub fn to_data(self) -> PlutusData {
        match self {
            TipJarRedeemer::Claim => PlutusData::constr(0, vec![]),
            TipJarRedeemer::AddTip => PlutusData::constr(1, vec![]),
        }
    }

    pub fn from_data(data: &PlutusData) -> Option<Self> {
        match data.as_constr()? {
            (0, []) => Some(TipJarRedeemer::Claim),
            (1, []) => Some(TipJarRedeemer::AddTip),
            _ => None,
        }
    }
}

/// The jar's spending rules. A tip must put strictly more lovelace back at
/// the jar's address under the same owner, with exactly one new message in
/// front of the old ones. Claiming needs the owner's signature.
pub struct TipJarValidator;

impl TipJarValidator {
    fn check_tip(own_input: &UTxO, datum: &TipJarDatum, tx: &Transaction) -> Result<(), String> {
        let continuing = tx
            .body()
            .outputs
            .iter()
            .find(|output| output.address == own_input.output.address)
            .ok_or("No continuing output at the tip jar address")?;
        let new_datum = match &continuing.datum {
            Some(Datum::Inline(data)) => TipJarDatum::from_data(data),
            _ => None,
        }
        .ok_or("Continuing output has no tip jar datum")?;

        if new_datum.owner != datum.owner {
            return Err("Tip jar owner changed".to_string());
        }
        match new_datum.messages.split_first() {
            Some((_, rest)) if rest == datum.messages.as_slice() => {}
            _ => return Err("Exactly one message must be added in front".to_string()),
        }
        if continuing.value.lovelace() <= own_input.output.value.lovelace() {
            return Err("Tip does not add any lovelace".to_string());
        }
        Ok(())
    }
}

impl ScriptEvaluator for TipJarValidator {
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String> {
        let own_input = context.own_input.ok_or("Tip jar only guards spending")?;
        let datum = context
            .datum
            .and_then(TipJarDatum::from_data)
            .ok_or("Missing or malformed tip jar datum")?;

        match TipJarRedeemer::from_data(context.redeemer).ok_or("Unknown redeemer")? {
            TipJarRedeemer::AddTip => Self::check_tip(own_input, &datum, context.tx),
            TipJarRedeemer::Claim if context.signed_by(&datum.owner) => Ok(()),
            TipJarRedeemer::Claim => Err("Claim is not signed by the owner".to_string()),
        }
    }
}

pub struct TipJarGame {
    pub validator: PlutusScript,
    pub address: Address,
    pub script_utxo: UTxO,

    /// Wallet balance after setup
    pub original_balance: Lovelace,
}

pub struct TipJarTest {
    /// Transaction that produced the jar as the player left it
    pub last_tx: TxHash,
}

/// Spend the jar with `AddTip`, paying it back with `new_datum` and `lovelace`
pub fn tip_draft(
    ctx: &LevelContext,
    game: &TipJarGame,
    jar: &UTxO,
    new_datum: &TipJarDatum,
    lovelace: Lovelace,
) -> TransactionDraft {
    ctx.new_tx()
        .attach_spending(jar.clone(), &game.validator, TipJarRedeemer::AddTip.to_data())
        .pay_to_contract(
            &game.address,
            OutputDatum::Inline(new_datum.to_data()),
            Value::from_lovelace(lovelace),
        )
}

/// The follow-up tip a friendly user would send. Ok(true) when it fails.
async fn try_to_tip(ctx: &LevelContext, game: &TipJarGame, jar: &UTxO) -> Result<bool> {
    let datum = TipJarDatum::of_utxo(jar)?;
    println!("Trying to tip some more...");
    let draft = tip_draft(
        ctx,
        game,
        jar,
        &datum.with_tip(FOLLOW_UP_MESSAGE.as_bytes()),
        jar.output.value.lovelace() + FOLLOW_UP_TIP,
    );
    let tx = match ctx.complete(draft).await {
        Ok(tx) => tx,
        Err(e) => {
            println!("{e:#}");
            return Ok(true);
        }
    };
    match ctx.sign_and_submit(tx).await {
        Ok(_) => Ok(false),
        Err(e) => {
            println!("{e}");
            Ok(true)
        }
    }
}

pub struct TipJar;

#[async_trait]
impl Level for TipJar {
    type GameData = TipJarGame;
    type TestData = TipJarTest;

    fn name(&self) -> &'static str {
        "04_tipjar"
    }

    fn problem_id(&self) -> Option<i64> {
        Some(4)
    }

    fn evaluators(&self) -> HashMap<String, Arc<dyn ScriptEvaluator>> {
        HashMap::from([(
            TIPJAR_VALIDATOR.to_string(),
            Arc::new(TipJarValidator) as Arc<dyn ScriptEvaluator>,
        )])
    }

    async fn setup(&self, ctx: &mut LevelContext) -> Result<TipJarGame> {
        println!("=== SETUP IN PROGRESS ===");
        let validator = ctx.validator(TIPJAR_VALIDATOR, &[]).await?;
        let address = ctx.validator_address(&validator);
        let owner = hex::decode(TIPJAR_OWNER)?;

        println!("Setting up tipjar!");
        let draft = ctx.new_tx().pay_to_contract(
            &address,
            OutputDatum::Inline(TipJarDatum::new(owner, vec![]).to_data()),
            Value::from_lovelace(INITIAL_LOVELACE),
        );
        let tx = ctx.complete(draft).await?;
        let tx_hash = ctx.sign_and_submit(tx).await?;
        println!("Setup transaction was submitted, awaiting confirmations!");
        ctx.await_tx(&tx_hash).await?;
        println!("Tip Jar was succesfully created{}", ctx.tx_details(&tx_hash));

        let script_utxo = filter_utxos_by_tx_hash(ctx.utxos_at(&address).await?, &tx_hash)
            .into_iter()
            .next()
            .context("Tip jar UTxO not found")?;
        let original_balance = ctx.wallet_balance().await?;
        println!("Your wallet's balance after setup is {original_balance}");
        println!("=== SETUP WAS SUCCESSFUL ===");

        Ok(TipJarGame {
            validator,
            address,
            script_utxo,
            original_balance,
        })
    }

    /// The happy path: tip 10 ADA with a thank-you note. This leaves the jar
    /// open to further tips, so the level's checks fail until it is replaced
    /// with a real solution.
    async fn play(&self, ctx: &mut LevelContext, game: &TipJarGame) -> Result<TipJarTest> {
        let jar = &game.script_utxo;
        let datum = TipJarDatum::of_utxo(jar)?;
        println!("The TipJar was created.");
        debug!("Jar UTxO {} holds {} with datum {datum:?}", jar.id, jar.output.value);

        let draft = tip_draft(
            ctx,
            game,
            jar,
            &datum.with_tip(PLAYER_MESSAGE.as_bytes()),
            jar.output.value.lovelace() + PLAYER_TIP,
        );
        let last_tx = ctx.submit_and_confirm(draft).await?;
        info!("Tipped the jar in {last_tx}");
        println!("AddTip transaction submitted, txHash: {last_tx}\n\t{}", ctx.explorer_link(&last_tx));
        Ok(TipJarTest { last_tx })
    }

    async fn test(
        &self,
        ctx: &mut LevelContext,
        game: &TipJarGame,
        test: &TipJarTest,
        report: &mut CheckReport,
    ) -> Result<()> {
        let end_balance = ctx.wallet_balance().await?;
        println!("Your wallet's balance at the end is {end_balance}");

        let jar = filter_utxos_by_tx_hash(ctx.utxos_at(&game.address).await?, &test.last_tx)
            .into_iter()
            .next()
            .context("No tip jar UTxO produced by the last transaction")?;

        let tip_failed = try_to_tip(ctx, game, &jar).await?;
        report.check(
            tip_failed,
            "it's not possible to tip anymore!",
            "tip attempt did not fail.",
        );

        let spent = game.original_balance.saturating_sub(end_balance);
        report.check(
            spent < MAX_SPENT_LOVELACE,
            "you spent less than 100 ADA.",
            "you spent too much ADA.",
        );
        Ok(())
    }

    fn completion_message(&self) -> String {
        "\nCongratulations on the successful completion of the Level 04: TipJar\n\
         You can compare your solution with ours by reading this blog post: \
         https://medium.com/@vacuumlabs_auditing/cardano-ctf-hints-and-solutions-e3991ce6a944\n\
         Good luck with the next level."
            .to_string()
    }
}

/// Owner key hash of the jar as configured for this level
pub fn tipjar_owner() -> Result<KeyHash> {
    TIPJAR_OWNER.parse().map_err(|e| anyhow::anyhow!("Bad owner hash: {e}"))
}
