//! Level 03: a treasury that releases funds once a multisig UTxO carries every
//! owner's signature

use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use ctf_common::{
    Address, Datum, Lovelace, NetworkId, PlutusData, PlutusScript, ScriptHash, TxHash, TxOutput,
    UTxO, Value,
};
use ctf_module_chain_backend::{ScriptContext, ScriptEvaluator};
use ctf_module_tx_builder::OutputDatum;
use tracing::{info, warn};

use crate::{
    context::{filter_utxos_by_tx_hash, LevelContext},
    report::CheckReport,
    runner::Level,
};

pub const MULTISIG_VALIDATOR: &str = "multisig.multisig";
pub const TREASURY_VALIDATOR: &str = "treasury.treasury";
pub const SECOND_OWNER: &str = "addr_test1vrvpqazgry8p3lahfhwssx5hywl6m045wtjwjy98rqhraegvk9r78";

const TREASURY_FUNDS: Lovelace = 10_000_000;
const MULTISIG_RELEASE: Lovelace = 8_000_000;
const MULTISIG_LOVELACE: Lovelace = 2_000_000;
const MIN_GAIN: Lovelace = 5_000_000;

fn key_hashes_to_data(keys: &[Vec<u8>]) -> PlutusData {
    PlutusData::List(keys.iter().map(PlutusData::bytes).collect())
}

fn key_hashes_from_data(data: &PlutusData) -> Option<Vec<Vec<u8>>> {
    data.as_list()?.iter().map(|key| key.as_bytes().map(<[u8]>::to_vec)).collect()
}

fn inline_datum(output: &TxOutput) -> Option<&PlutusData> {
    output.datum.as_ref().and_then(Datum::inline_data)
}

/// `Constr 0 [release_value, beneficiary, required_signers, signed_users]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigDatum {
    pub release_value: Lovelace,
    pub beneficiary: Address,
    pub required_signers: Vec<Vec<u8>>,
    pub signed_users: Vec<Vec<u8>>,
}

impl MultisigDatum {
    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::integer(self.release_value as i64),
                self.beneficiary.to_plutus_data(),
                key_hashes_to_data(&self.required_signers),
                key_hashes_to_data(&self.signed_users),
            ],
        )
    }

    pub fn from_data(data: &PlutusData, network: NetworkId) -> Option<Self> {
        let (0, [release_value, beneficiary, required_signers, signed_users]) = data.as_constr()?
        else {
            return None;
        };
        Some(Self {
            release_value: u64::try_from(release_value.as_integer()?).ok()?,
            beneficiary: Address::from_plutus_data(beneficiary, network)?,
            required_signers: key_hashes_from_data(required_signers)?,
            signed_users: key_hashes_from_data(signed_users)?,
        })
    }

    pub fn of_utxo(utxo: &UTxO) -> Result<Self> {
        inline_datum(&utxo.output)
            .and_then(|data| Self::from_data(data, utxo.output.address.network))
            .context("UTxO does not carry a multisig datum")
    }

    pub fn is_fully_signed(&self) -> bool {
        self.required_signers.iter().all(|signer| self.signed_users.contains(signer))
    }

    /// The datum after `signer` has signed
    pub fn with_signature(&self, signer: &[u8]) -> Self {
        let mut signed = self.clone();
        signed.signed_users.push(signer.to_vec());
        signed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultisigRedeemer {
    Use,
    Sign,
}

impl MultisigRedeemer {
    pub fn to_data(self) -> PlutusData {
        match self {
            MultisigRedeemer::Use => PlutusData::constr(0, vec![]),
            MultisigRedeemer::Sign => PlutusData::constr(1, vec![]),
        }
    }

    pub fn from_data(data: &PlutusData) -> Option<Self> {
        match data.as_constr()? {
            (0, []) => Some(MultisigRedeemer::Use),
            (1, []) => Some(MultisigRedeemer::Sign),
            _ => None,
        }
    }
}

/// `Constr 0 [value, owners]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasuryDatum {
    pub value: Lovelace,
    pub owners: Vec<Vec<u8>>,
}

impl TreasuryDatum {
    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![PlutusData::integer(self.value as i64), key_hashes_to_data(&self.owners)],
        )
    }

    pub fn from_data(data: &PlutusData) -> Option<Self> {
        let (0, [value, owners]) = data.as_constr()? else {
            return None;
        };
        Some(Self {
            value: u64::try_from(value.as_integer()?).ok()?,
            owners: key_hashes_from_data(owners)?,
        })
    }
}

/// Collects signatures one transaction at a time. `Sign` adds the signing
/// owner to the continuing datum; `Use` needs every owner to have signed.
pub struct MultisigValidator;

impl MultisigValidator {
    fn check_sign(
        own_input: &UTxO,
        datum: &MultisigDatum,
        context: &ScriptContext<'_>,
    ) -> Result<(), String> {
        let network = own_input.output.address.network;
        let new_datum = context
            .tx
            .body()
            .outputs
            .iter()
            .filter(|output| output.address == own_input.output.address)
            .find_map(|output| inline_datum(output).and_then(|data| MultisigDatum::from_data(data, network)))
            .ok_or("No continuing multisig output")?;

        let Some((signer, previous)) = new_datum.signed_users.split_last() else {
            return Err("No signature added".to_string());
        };
        if previous != datum.signed_users.as_slice() {
            return Err("Earlier signatures must be kept in order".to_string());
        }
        if new_datum != datum.with_signature(signer) {
            return Err("Only the signatures may change".to_string());
        }
        if !datum.required_signers.contains(signer) || datum.signed_users.contains(signer) {
            return Err("Signer is not an owner that still has to sign".to_string());
        }
        if !context.signed_by(signer) {
            return Err("Transaction is not signed by the new signer".to_string());
        }
        Ok(())
    }
}

impl ScriptEvaluator for MultisigValidator {
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String> {
        let own_input = context.own_input.ok_or("Multisig only guards spending")?;
        let datum = context
            .datum
            .and_then(|data| MultisigDatum::from_data(data, own_input.output.address.network))
            .ok_or("Missing or malformed multisig datum")?;

        match MultisigRedeemer::from_data(context.redeemer).ok_or("Unknown redeemer")? {
            MultisigRedeemer::Sign => Self::check_sign(own_input, &datum, context),
            MultisigRedeemer::Use if datum.is_fully_signed() => Ok(()),
            MultisigRedeemer::Use => Err("Not every required signer has signed".to_string()),
        }
    }
}

/// `treasury.treasury` before the multisig hash is applied
pub struct TreasuryTemplate;

impl ScriptEvaluator for TreasuryTemplate {
    fn evaluate(&self, _context: &ScriptContext<'_>) -> Result<(), String> {
        Err("Treasury is missing its multisig parameter".to_string())
    }

    fn apply_params(&self, params: &[PlutusData]) -> Option<Arc<dyn ScriptEvaluator>> {
        let [multisig] = params else {
            return None;
        };
        let multisig = ScriptHash::try_from(multisig.as_bytes()?).ok()?;
        Some(Arc::new(TreasuryValidator { multisig }))
    }
}

/// Releases `release_value` when the transaction also spends a fully signed
/// multisig UTxO of the treasury owners. Any UTxO at the multisig address
/// counts, whoever created it.
pub struct TreasuryValidator {
    pub multisig: ScriptHash,
}

impl ScriptEvaluator for TreasuryValidator {
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String> {
        let own_input = context.own_input.ok_or("Treasury only guards spending")?;
        let datum = context
            .datum
            .and_then(TreasuryDatum::from_data)
            .ok_or("Missing or malformed treasury datum")?;
        let network = own_input.output.address.network;

        let multisig = context
            .inputs
            .iter()
            .filter(|utxo| utxo.output.address.payment_script_hash() == Some(self.multisig))
            .filter_map(|utxo| {
                inline_datum(&utxo.output).and_then(|data| MultisigDatum::from_data(data, network))
            })
            .find(|multisig| multisig.required_signers == datum.owners && multisig.is_fully_signed())
            .ok_or("No fully signed multisig of the treasury owners is spent")?;

        let remaining = datum
            .value
            .checked_sub(multisig.release_value)
            .ok_or("Release exceeds the treasury")?;
        let expected = TreasuryDatum {
            value: remaining,
            owners: datum.owners,
        };
        let continuing = context
            .tx
            .body()
            .outputs
            .iter()
            .find(|output| {
                output.address == own_input.output.address
                    && inline_datum(output).and_then(TreasuryDatum::from_data).as_ref() == Some(&expected)
            })
            .ok_or("No continuing treasury output with the reduced value")?;
        if continuing.value.lovelace() < remaining {
            return Err("Continuing treasury holds less than its datum says".to_string());
        }
        Ok(())
    }
}

pub struct MultisigTreasuryGame {
    pub multisig_validator: PlutusScript,
    pub multisig_address: Address,
    pub treasury_validator: PlutusScript,
    pub treasury_address: Address,
    pub treasury_funds: Lovelace,
    pub treasury_owners: Vec<Vec<u8>>,
    pub multisig_release_value: Lovelace,
    pub multisig_beneficiary: Address,
    pub treasury_utxo: UTxO,
    pub treasury_tx: TxHash,
    pub multisig_utxo: UTxO,

    /// Wallet balance after setup
    pub original_balance: Lovelace,
}

pub struct MultisigTreasury;

#[async_trait]
impl Level for MultisigTreasury {
    type GameData = MultisigTreasuryGame;
    type TestData = ();

    fn name(&self) -> &'static str {
        "03_multisig_treasury"
    }

    fn problem_id(&self) -> Option<i64> {
        Some(3)
    }

    fn evaluators(&self) -> HashMap<String, Arc<dyn ScriptEvaluator>> {
        HashMap::from([
            (
                MULTISIG_VALIDATOR.to_string(),
                Arc::new(MultisigValidator) as Arc<dyn ScriptEvaluator>,
            ),
            (
                TREASURY_VALIDATOR.to_string(),
                Arc::new(TreasuryTemplate) as Arc<dyn ScriptEvaluator>,
            ),
        ])
    }

    async fn setup(&self, ctx: &mut LevelContext) -> Result<MultisigTreasuryGame> {
        println!("=== SETUP IN PROGRESS ===");
        let multisig_validator = ctx.validator(MULTISIG_VALIDATOR, &[]).await?;
        let multisig_address = ctx.validator_address(&multisig_validator);
        let treasury_validator = ctx
            .validator(TREASURY_VALIDATOR, &[PlutusData::bytes(multisig_validator.hash())])
            .await?;
        let treasury_address = ctx.validator_address(&treasury_validator);

        let second_owner = Address::from_bech32(SECOND_OWNER)?
            .payment_key_hash()
            .context("Second owner address is not key-locked")?;
        let owners = vec![ctx.wallet().key_hash().to_vec(), second_owner.to_vec()];
        let beneficiary = ctx.wallet_address().clone();

        let treasury_datum = TreasuryDatum {
            value: TREASURY_FUNDS,
            owners: owners.clone(),
        };
        let draft = ctx.new_tx().pay_to_contract(
            &treasury_address,
            OutputDatum::Inline(treasury_datum.to_data()),
            Value::from_lovelace(TREASURY_FUNDS),
        );
        let treasury_tx = ctx.submit_and_confirm(draft).await?;
        println!("Treasury setup transaction was submitted{}", ctx.tx_details(&treasury_tx));
        let treasury_utxo =
            filter_utxos_by_tx_hash(ctx.utxos_at(&treasury_address).await?, &treasury_tx)
                .into_iter()
                .next()
                .context("Treasury UTxO not found")?;

        let multisig_datum = MultisigDatum {
            release_value: MULTISIG_RELEASE,
            beneficiary: beneficiary.clone(),
            required_signers: owners.clone(),
            signed_users: vec![],
        };
        let draft = ctx.new_tx().pay_to_contract(
            &multisig_address,
            OutputDatum::Inline(multisig_datum.to_data()),
            Value::from_lovelace(MULTISIG_LOVELACE),
        );
        let multisig_tx = ctx.submit_and_confirm(draft).await?;
        println!("Multisig setup transaction was submitted{}", ctx.tx_details(&multisig_tx));
        let multisig_utxo =
            filter_utxos_by_tx_hash(ctx.utxos_at(&multisig_address).await?, &multisig_tx)
                .into_iter()
                .next()
                .context("Multisig UTxO not found")?;

        let original_balance = ctx.wallet_balance().await?;
        println!("Your wallet's balance after setup is {original_balance}");
        println!("=== SETUP WAS SUCCESSFUL ===");

        Ok(MultisigTreasuryGame {
            multisig_validator,
            multisig_address,
            treasury_validator,
            treasury_address,
            treasury_funds: TREASURY_FUNDS,
            treasury_owners: owners,
            multisig_release_value: MULTISIG_RELEASE,
            multisig_beneficiary: beneficiary,
            treasury_utxo,
            treasury_tx,
            multisig_utxo,
            original_balance,
        })
    }

    /// The happy path: sign the multisig, then try to release the treasury.
    /// The release is rejected because the second owner never signs.
    async fn play(&self, ctx: &mut LevelContext, game: &MultisigTreasuryGame) -> Result<()> {
        let own_key = ctx.wallet().key_hash();
        let datum = MultisigDatum::of_utxo(&game.multisig_utxo)?;
        let draft = ctx
            .new_tx()
            .attach_spending(
                game.multisig_utxo.clone(),
                &game.multisig_validator,
                MultisigRedeemer::Sign.to_data(),
            )
            .pay_to_contract(
                &game.multisig_address,
                OutputDatum::Inline(datum.with_signature(own_key.as_ref()).to_data()),
                Value::default(),
            )
            .add_signer(own_key);
        let sign_tx = ctx.submit_and_confirm(draft).await?;
        println!("Multisig signing transaction submitted, txHash: {sign_tx}\n\t{}", ctx.explorer_link(&sign_tx));

        let signed_multisig = filter_utxos_by_tx_hash(ctx.utxos_at(&game.multisig_address).await?, &sign_tx)
            .into_iter()
            .next()
            .context("Signed multisig UTxO not found")?;
        let remaining = game.treasury_funds - game.multisig_release_value;
        let draft = ctx
            .new_tx()
            .attach_spending(signed_multisig, &game.multisig_validator, MultisigRedeemer::Use.to_data())
            .attach_spending(game.treasury_utxo.clone(), &game.treasury_validator, PlutusData::unit())
            .pay_to_contract(
                &game.treasury_address,
                OutputDatum::Inline(
                    TreasuryDatum {
                        value: remaining,
                        owners: game.treasury_owners.clone(),
                    }
                    .to_data(),
                ),
                Value::from_lovelace(remaining),
            )
            .add_signer(own_key);
        match ctx.submit_and_confirm(draft).await {
            Ok(tx_hash) => {
                info!("Released the treasury in {tx_hash}");
                println!("Access treasury transaction submitted, txHash: {tx_hash}\n\t{}", ctx.explorer_link(&tx_hash));
            }
            Err(e) => {
                warn!("Treasury release rejected: {e:#}");
                println!("Access treasury transaction failed: {e:#}");
            }
        }
        Ok(())
    }

    async fn test(
        &self,
        ctx: &mut LevelContext,
        game: &MultisigTreasuryGame,
        _test: &(),
        report: &mut CheckReport,
    ) -> Result<()> {
        let end_balance = ctx.wallet_balance().await?;
        report.check(
            end_balance.saturating_sub(game.original_balance) >= MIN_GAIN,
            "you unlocked the treasury",
            "you did not obtain enough additional ADA by unlocking the treasury",
        );

        let treasury = filter_utxos_by_tx_hash(ctx.utxos_at(&game.treasury_address).await?, &game.treasury_tx);
        report.check(
            treasury.is_empty(),
            "the treasury UTxO was spent",
            "the treasury UTxO was not spent",
        );
        Ok(())
    }

    fn completion_message(&self) -> String {
        "\nCongratulations on the successful completion of the Level 03: Multisig Treasury\n\
         You can read more about the underlying vulnerability in this blog post: \
         https://medium.com/@vacuumlabs_auditing/cardano-vulnerabilities-3-trust-no-utxo-b252650ac2b9\n\
         Good luck with the next level."
            .to_string()
    }
}

/// Treasury datum of a treasury UTxO
pub fn treasury_datum(utxo: &UTxO) -> Result<TreasuryDatum> {
    match inline_datum(&utxo.output) {
        Some(data) => TreasuryDatum::from_data(data).context("UTxO datum is not a treasury datum"),
        None => bail!("UTxO object does not contain datum."),
    }
}
