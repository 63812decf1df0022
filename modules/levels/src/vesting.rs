//! Level 02: 5 ADA vested to the player for 5 hours

use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use ctf_common::{Address, Datum, Lovelace, PlutusData, PlutusScript, TxHash, UTxO, Value};
use ctf_module_chain_backend::{ScriptContext, ScriptEvaluator};
use ctf_module_tx_builder::OutputDatum;
use tracing::info;

use crate::{
    context::{filter_utxos_by_tx_hash, LevelContext},
    report::CheckReport,
    runner::Level,
};

pub const VESTING_VALIDATOR: &str = "vesting.vesting";

pub const MINUTE_MS: u64 = 60_000;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;

const VESTED_LOVELACE: Lovelace = 5_000_000;
const LOCK_DURATION_MS: u64 = 5 * HOUR_MS;
const MAX_WAIT_MS: u64 = 4 * HOUR_MS;
const MIN_GAIN: Lovelace = 4_000_000;

/// `Constr 0 [lock_until, beneficiary]`, the lock in POSIX milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VestingDatum {
    pub lock_until: u64,
    pub beneficiary: Vec<u8>,
}

impl VestingDatum {
    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::integer(self.lock_until as i64),
                PlutusData::bytes(&self.beneficiary),
            ],
        )
    }

    pub fn from_data(data: &PlutusData) -> Option<Self> {
        let (0, [lock_until, beneficiary]) = data.as_constr()? else {
            return None;
        };
        Some(Self {
            lock_until: u64::try_from(lock_until.as_integer()?).ok()?,
            beneficiary: beneficiary.as_bytes()?.to_vec(),
        })
    }
}

/// Lets the beneficiary collect once the lock has passed. The lock is
/// compared with the end of the validity interval, which the spender picks.
pub struct VestingValidator;

impl ScriptEvaluator for VestingValidator {
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String> {
        context.own_input.ok_or("Vesting only guards spending")?;
        let datum = context
            .datum
            .and_then(VestingDatum::from_data)
            .ok_or("Missing or malformed vesting datum")?;

        if !context.signed_by(&datum.beneficiary) {
            return Err("Not signed by the beneficiary".to_string());
        }
        match context.valid_to_ms() {
            Some(end) if end > datum.lock_until => Ok(()),
            Some(_) => Err(format!("Vesting is locked until {}", datum.lock_until)),
            None => Err("Validity interval has no upper bound".to_string()),
        }
    }
}

pub struct VestingGame {
    pub validator: PlutusScript,
    pub address: Address,
    pub script_utxo: UTxO,
    pub lock_until: u64,
    pub tx_hash: TxHash,
    pub start_time: u64,

    /// Wallet balance after setup
    pub original_balance: Lovelace,
}

pub struct Vesting;

#[async_trait]
impl Level for Vesting {
    type GameData = VestingGame;
    type TestData = ();

    fn name(&self) -> &'static str {
        "02_vesting"
    }

    fn problem_id(&self) -> Option<i64> {
        Some(2)
    }

    fn evaluators(&self) -> HashMap<String, Arc<dyn ScriptEvaluator>> {
        HashMap::from([(
            VESTING_VALIDATOR.to_string(),
            Arc::new(VestingValidator) as Arc<dyn ScriptEvaluator>,
        )])
    }

    async fn setup(&self, ctx: &mut LevelContext) -> Result<VestingGame> {
        println!("\n=== SETUP IN PROGRESS ===");
        let validator = ctx.validator(VESTING_VALIDATOR, &[]).await?;
        let address = ctx.validator_address(&validator);

        println!("Creating a vesting UTxO that locks 5 ADA for 5 hours...\n");
        let start_time = ctx.now_ms().await?;
        let lock_until = start_time + LOCK_DURATION_MS;
        let datum = VestingDatum {
            lock_until,
            beneficiary: ctx.wallet().key_hash().to_vec(),
        };
        let draft = ctx.new_tx().pay_to_contract(
            &address,
            OutputDatum::Inline(datum.to_data()),
            Value::from_lovelace(VESTED_LOVELACE),
        );
        let tx_hash = ctx.submit_and_confirm(draft).await?;
        println!("                               Current time: {}", ctx.now_ms().await?);
        println!(
            "5 ADA locked into the vesting contract until {lock_until}{}",
            ctx.tx_details(&tx_hash)
        );

        let script_utxo = filter_utxos_by_tx_hash(ctx.utxos_at(&address).await?, &tx_hash)
            .into_iter()
            .next()
            .context("Vesting UTxO not found")?;
        let original_balance = ctx.wallet_balance().await?;
        println!("\n=== SETUP WAS SUCCESSFUL ===\n");

        Ok(VestingGame {
            validator,
            address,
            script_utxo,
            lock_until,
            tx_hash,
            start_time,
            original_balance,
        })
    }

    /// The happy path: wait out the whole lock, then collect
    async fn play(&self, ctx: &mut LevelContext, game: &VestingGame) -> Result<()> {
        let offset = 5 * MINUTE_MS;
        let remaining = game.lock_until.saturating_sub(ctx.now_ms().await?);
        println!(
            "Vesting will be unlocked in {} hours and {} minutes.\n\twaiting till the end of the vesting...",
            remaining / HOUR_MS,
            (remaining % HOUR_MS) / MINUTE_MS
        );
        ctx.wait_until(game.lock_until + 2 * offset).await?;

        let now = ctx.now_ms().await?;
        let draft = ctx
            .new_tx()
            .attach_spending(game.script_utxo.clone(), &game.validator, PlutusData::unit())
            .add_signer(ctx.wallet().key_hash())
            .valid_from(now.saturating_sub(offset))
            .valid_to(now + offset);
        let tx_hash = ctx.submit_and_confirm(draft).await?;
        info!("Collected the vesting UTxO in {tx_hash}");
        println!("Vesting unlocked{}", ctx.tx_details(&tx_hash));
        Ok(())
    }

    async fn test(
        &self,
        ctx: &mut LevelContext,
        game: &VestingGame,
        _test: &(),
        report: &mut CheckReport,
    ) -> Result<()> {
        let remaining = filter_utxos_by_tx_hash(ctx.utxos_at(&game.address).await?, &game.tx_hash);
        let end_balance = ctx.wallet_balance().await?;
        let end_time = ctx.now_ms().await?;

        report.check(
            remaining.is_empty(),
            "the vesting UTxO was spent",
            "the vesting UTxO was not spent",
        );
        report.check(
            end_balance.saturating_sub(game.original_balance) >= MIN_GAIN,
            "your wallet obtained the vested ADA",
            "your wallet did not obtain additional rewards",
        );
        if end_time < game.start_time {
            bail!("Chain clock went backwards: {end_time} < {}", game.start_time);
        }
        report.check(
            end_time - game.start_time <= MAX_WAIT_MS,
            "you did not wait for the vesting to end",
            "you waited more than 4 hours since the vesting was created",
        );
        Ok(())
    }

    fn completion_message(&self) -> String {
        "\nCongratulations on the successful completion of the Level 02: Vesting\nGood luck with the next level."
            .to_string()
    }
}

/// Datum of a vesting UTxO; only inline datums are used by this level
pub fn vesting_datum(utxo: &UTxO) -> Result<VestingDatum> {
    match &utxo.output.datum {
        Some(Datum::Inline(data)) => {
            VestingDatum::from_data(data).context("UTxO datum is not a vesting datum")
        }
        _ => bail!("UTxO object does not contain datum."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_common::{
        validation::ScriptPurpose, Hash, KeyHash, NetworkId, SlotConfig, Transaction, TxBody,
        TxOutput, UTxOIdentifier, WitnessSet,
    };
    use test_case::test_case;

    const LOCK_UNTIL: u64 = 1_666_656_000_000 + 5 * HOUR_MS;

    fn beneficiary() -> KeyHash {
        Hash::new([4; 28])
    }

    fn vesting_utxo() -> UTxO {
        let datum = VestingDatum {
            lock_until: LOCK_UNTIL,
            beneficiary: beneficiary().to_vec(),
        };
        UTxO::new(
            UTxOIdentifier::new(Hash::new([1; 32]), 0),
            TxOutput::new(
                Address::from_script_hash(NetworkId::Testnet, Hash::new([7; 28])),
                Value::from_lovelace(5_000_000),
            )
            .with_datum(Datum::Inline(datum.to_data())),
        )
    }

    fn collect(valid_to_ms: Option<u64>, signer: Option<KeyHash>) -> Result<(), String> {
        let slots = SlotConfig::default();
        let input = vesting_utxo();
        let body = TxBody {
            inputs: vec![input.id],
            ttl: valid_to_ms.map(|ms| slots.slot_at(ms)),
            required_signers: signer.into_iter().collect(),
            ..Default::default()
        };
        let tx = Transaction::new(body, WitnessSet::default());
        VestingValidator.evaluate(&ScriptContext {
            purpose: ScriptPurpose::Spend(input.id),
            own_input: Some(&input),
            datum: input.output.datum.as_ref().and_then(Datum::inline_data),
            redeemer: &PlutusData::unit(),
            tx: &tx,
            inputs: std::slice::from_ref(&input),
            slot_config: slots,
        })
    }

    #[test]
    fn datum_converts_both_ways() {
        let datum = vesting_datum(&vesting_utxo()).unwrap();
        assert_eq!(datum.lock_until, LOCK_UNTIL);
        assert_eq!(VestingDatum::from_data(&datum.to_data()), Some(datum));
        assert_eq!(VestingDatum::from_data(&PlutusData::integer(-1)), None);
    }

    #[test_case(Some(LOCK_UNTIL + 10 * MINUTE_MS), Some(beneficiary()) => true; "after the lock")]
    #[test_case(Some(LOCK_UNTIL - HOUR_MS), Some(beneficiary()) => false; "before the lock")]
    #[test_case(None, Some(beneficiary()) => false; "unbounded interval")]
    #[test_case(Some(LOCK_UNTIL + 10 * MINUTE_MS), None => false; "unsigned")]
    #[test_case(Some(LOCK_UNTIL + 10 * MINUTE_MS), Some(Hash::new([5; 28])) => false; "wrong signer")]
    fn collects(valid_to_ms: Option<u64>, signer: Option<KeyHash>) -> bool {
        collect(valid_to_ms, signer).is_ok()
    }
}
