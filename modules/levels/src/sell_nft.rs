//! Level 01: two freshly minted NFTs listed for sale at a script that only
//! checks that the seller gets paid

use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use ctf_common::{
    validation::ScriptPurpose, Address, AssetDeltas, AssetId, AssetName, Datum, Lovelace,
    NetworkId, PlutusData, PlutusScript, UTxO, UTxOIdentifier, Value,
};
use ctf_module_chain_backend::{ScriptContext, ScriptEvaluator};
use ctf_module_tx_builder::OutputDatum;
use tracing::{debug, info};

use crate::{
    context::{filter_utxos_by_tx_hash, LevelContext},
    report::CheckReport,
    runner::Level,
};

pub const NFT_POLICY: &str = "nft.unique_nft";
pub const NFT_SELL_VALIDATOR: &str = "nft_sell.buy";
pub const SELLER: &str = "addr_test1vzztaxzsletuxldhd6ucyugn5uaye0qeumes3zt03q9xd4qe52pp4";

/// Lovelace travelling with each listed NFT
const LISTING_LOVELACE: Lovelace = 2_000_000;
const FIRST_PRICE: Lovelace = 50_000_000;
const SECOND_PRICE: Lovelace = 40_000_000;

/// `Constr 0 [seller, price]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellNftDatum {
    pub seller: Address,
    pub price: Lovelace,
}

impl SellNftDatum {
    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![self.seller.to_plutus_data(), PlutusData::integer(self.price as i64)],
        )
    }

    /// The seller address is read on `network`; datums do not carry one
    pub fn from_data(data: &PlutusData, network: NetworkId) -> Option<Self> {
        let (0, [seller, price]) = data.as_constr()? else {
            return None;
        };
        Some(Self {
            seller: Address::from_plutus_data(seller, network)?,
            price: u64::try_from(price.as_integer()?).ok()?,
        })
    }

    pub fn of_utxo(utxo: &UTxO) -> Result<Self> {
        match &utxo.output.datum {
            Some(Datum::Inline(data)) => Self::from_data(data, utxo.output.address.network)
                .context("UTxO datum is not a sale datum"),
            _ => bail!("UTxO object does not contain datum."),
        }
    }
}

/// Releases a listing once some output pays the seller at least the price.
/// The payment is not tied to the listing, so one payment can release
/// several listings of the same seller.
pub struct NftSellValidator;

impl ScriptEvaluator for NftSellValidator {
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String> {
        let own_input = context.own_input.ok_or("Sale script only guards spending")?;
        let datum = context
            .datum
            .and_then(|data| SellNftDatum::from_data(data, own_input.output.address.network))
            .ok_or("Missing or malformed sale datum")?;

        let paid = context
            .tx
            .body()
            .outputs
            .iter()
            .any(|output| output.address == datum.seller && output.value.lovelace() >= datum.price);
        if paid {
            Ok(())
        } else {
            Err(format!("Seller is not paid {} lovelace", datum.price))
        }
    }
}

/// `nft.unique_nft` before its token name and origin UTxO are applied
pub struct UniqueNftTemplate;

impl ScriptEvaluator for UniqueNftTemplate {
    fn evaluate(&self, _context: &ScriptContext<'_>) -> Result<(), String> {
        Err("Minting policy is missing its parameters".to_string())
    }

    /// Parameters: token name bytes, then the origin output reference
    fn apply_params(&self, params: &[PlutusData]) -> Option<Arc<dyn ScriptEvaluator>> {
        let [token_name, origin] = params else {
            return None;
        };
        Some(Arc::new(UniqueNftPolicy {
            token_name: AssetName::new(token_name.as_bytes()?)?,
            origin: UTxOIdentifier::from_plutus_data(origin)?,
        }))
    }
}

/// Mints exactly one `token_name`, only in the transaction spending `origin`
pub struct UniqueNftPolicy {
    pub token_name: AssetName,
    pub origin: UTxOIdentifier,
}

impl ScriptEvaluator for UniqueNftPolicy {
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String> {
        let ScriptPurpose::Mint(policy_id) = context.purpose else {
            return Err("Unique NFT policy only mints".to_string());
        };
        let body = context.tx.body();
        if !body.inputs.contains(&self.origin) {
            return Err(format!("Origin UTxO {} is not spent", self.origin));
        }
        let expected = AssetDeltas::from([(self.token_name, 1)]);
        match body.mint.get(&policy_id) {
            Some(minted) if *minted == expected => Ok(()),
            _ => Err(format!("Must mint exactly one {}", self.token_name)),
        }
    }
}

pub struct SellNftGame {
    pub validator: PlutusScript,
    pub address: Address,

    /// Both listings, in output order: the 50 ADA one first
    pub script_utxos: Vec<UTxO>,
    pub assets: [AssetId; 2],
    pub seller: Address,

    /// Wallet balance after setup
    pub original_balance: Lovelace,
}

pub struct SellNft;

#[async_trait]
impl Level for SellNft {
    type GameData = SellNftGame;
    type TestData = ();

    fn name(&self) -> &'static str {
        "01_sell_nft"
    }

    fn problem_id(&self) -> Option<i64> {
        Some(1)
    }

    fn evaluators(&self) -> HashMap<String, Arc<dyn ScriptEvaluator>> {
        HashMap::from([
            (
                NFT_SELL_VALIDATOR.to_string(),
                Arc::new(NftSellValidator) as Arc<dyn ScriptEvaluator>,
            ),
            (
                NFT_POLICY.to_string(),
                Arc::new(UniqueNftTemplate) as Arc<dyn ScriptEvaluator>,
            ),
        ])
    }

    async fn setup(&self, ctx: &mut LevelContext) -> Result<SellNftGame> {
        println!("=== SETUP IN PROGRESS ===");
        let origin = ctx
            .utxos_at(ctx.wallet_address())
            .await?
            .into_iter()
            .next()
            .context("Wallet has no UTxO to mint from")?;
        let unique_id = hex::encode(&origin.id.tx_hash[..4]);
        let token_name = |n: u8| {
            AssetName::from_text(&format!("{unique_id} -- NFT{n}")).context("Token name too long")
        };
        let (name1, name2) = (token_name(1)?, token_name(2)?);

        let validator = ctx.validator(NFT_SELL_VALIDATOR, &[]).await?;
        let address = ctx.validator_address(&validator);
        let origin_ref = origin.id.to_plutus_data();
        let policy1 =
            ctx.validator(NFT_POLICY, &[PlutusData::bytes(name1.as_slice()), origin_ref.clone()]).await?;
        let policy2 = ctx.validator(NFT_POLICY, &[PlutusData::bytes(name2.as_slice()), origin_ref]).await?;
        let assets = [
            AssetId::Native(policy1.hash(), name1),
            AssetId::Native(policy2.hash(), name2),
        ];

        let mut seller = Address::from_bech32(SELLER)?;
        seller.network = ctx.network_id();
        let listing = |price: Lovelace| {
            OutputDatum::Inline(
                SellNftDatum {
                    seller: seller.clone(),
                    price,
                }
                .to_data(),
            )
        };

        println!("Minting NFTs and locking them into a vulnerable contract...");
        let draft = ctx
            .new_tx()
            .collect_from([origin], None)
            .attach_mint(&policy1, AssetDeltas::from([(name1, 1)]), PlutusData::unit())
            .attach_mint(&policy2, AssetDeltas::from([(name2, 1)]), PlutusData::unit())
            .pay_to_contract(
                &address,
                listing(FIRST_PRICE),
                Value::from_lovelace(LISTING_LOVELACE).with_asset(policy2.hash(), name2, 1),
            )
            .pay_to_contract(
                &address,
                listing(SECOND_PRICE),
                Value::from_lovelace(LISTING_LOVELACE).with_asset(policy1.hash(), name1, 1),
            );
        let tx = ctx.complete(draft).await?;
        let tx_hash = ctx.sign_and_submit(tx).await?;
        println!("Setup transaction was submitted, awaiting confirmations!");
        ctx.await_tx(&tx_hash).await?;
        println!("NFTs were minted{}", ctx.tx_details(&tx_hash));

        let mut script_utxos = filter_utxos_by_tx_hash(ctx.utxos_at(&address).await?, &tx_hash);
        script_utxos.sort_by_key(|utxo| utxo.id);
        if script_utxos.len() != 2 {
            bail!("Expected two listings, found {}", script_utxos.len());
        }
        let original_balance = ctx.wallet_balance().await?;
        println!("Your wallet's balance after setup is {original_balance}");
        println!("=== SETUP WAS SUCCESSFUL ===");

        Ok(SellNftGame {
            validator,
            address,
            script_utxos,
            assets,
            seller,
            original_balance,
        })
    }

    /// The happy path: buy the cheaper NFT at its full price
    async fn play(&self, ctx: &mut LevelContext, game: &SellNftGame) -> Result<()> {
        println!("\nTwo UTxOs at the smart contract script address were created.");
        for utxo in &game.script_utxos {
            let datum = SellNftDatum::of_utxo(utxo)?;
            println!("Listing {} holds {} for {} lovelace", utxo.id, utxo.output.value, datum.price);
        }

        let listing = &game.script_utxos[1];
        let datum = SellNftDatum::of_utxo(listing)?;
        let draft = ctx
            .new_tx()
            .attach_spending(listing.clone(), &game.validator, PlutusData::unit())
            .pay_to_address(&datum.seller, Value::from_lovelace(datum.price));
        let tx_hash = ctx.submit_and_confirm(draft).await?;
        info!("Bought listing {} in {tx_hash}", listing.id);
        println!("BuyNFT transaction submitted{}", ctx.tx_details(&tx_hash));
        Ok(())
    }

    async fn test(
        &self,
        ctx: &mut LevelContext,
        game: &SellNftGame,
        _test: &(),
        report: &mut CheckReport,
    ) -> Result<()> {
        let wallet_utxos = ctx.utxos_at(ctx.wallet_address()).await?;
        let end_balance: Lovelace = wallet_utxos.iter().map(|utxo| utxo.output.value.lovelace()).sum();
        println!("Your wallet's balance at the end is {end_balance}");

        for asset in &game.assets {
            let owned = wallet_utxos.iter().any(|utxo| utxo.output.value.quantity_of(asset) > 0);
            debug!("NFT {asset} in wallet: {owned}");
            report.check(
                owned,
                &format!("you bought NFT {asset}"),
                &format!("you did not buy NFT {asset}"),
            );
        }

        let total_price: Lovelace = game
            .script_utxos
            .iter()
            .map(|utxo| SellNftDatum::of_utxo(utxo).map(|datum| datum.price))
            .sum::<Result<_>>()?;
        let spent = game.original_balance.saturating_sub(end_balance);
        report.check(
            spent < total_price,
            "you spent less than the price of both NFTs",
            "you spent too much ADA!",
        );
        Ok(())
    }

    fn completion_message(&self) -> String {
        "\nCongratulations on the successful completion of the Level 01: Sell NFT\n\
         You can read more about the underlying vulnerability in this blog post: \
         https://medium.com/@vacuumlabs_auditing/cardano-vulnerabilities-1-double-satisfaction-219f1bc9665e\n\
         Good luck with the next level."
            .to_string()
    }
}
