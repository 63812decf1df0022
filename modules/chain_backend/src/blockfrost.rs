//! Blockfrost REST backend for the live testnet

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ctf_common::{
    configuration::{BlockfrostConfig, TargetNetwork},
    protocol_params::rational_number_from_f64,
    validation::SubmitError,
    Address, AssetName, Datum, DatumHash, ExUnits, Hash, NetworkId, PlutusData, PlutusVersion,
    ProtocolParams, SignedTransaction, SlotConfig, TxHash, TxOutput, UTxO, UTxOIdentifier, Value,
};
use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info, instrument, warn};

use crate::backend::ChainBackend;

const PAGE_SIZE: usize = 100;

pub struct Blockfrost {
    client: Client,
    url: String,
    project_id: String,
    network: NetworkId,
}

#[derive(Deserialize)]
struct AmountJson {
    unit: String,
    quantity: String,
}

#[derive(Deserialize)]
struct UtxoJson {
    tx_hash: String,
    output_index: u16,
    amount: Vec<AmountJson>,
    data_hash: Option<String>,
    inline_datum: Option<String>,
}

#[derive(Deserialize)]
struct TxJson {
    block: String,
}

#[derive(Deserialize)]
struct BlockJson {
    confirmations: u64,
}

#[derive(Deserialize)]
struct ParametersJson {
    min_fee_a: u64,
    min_fee_b: u64,
    max_tx_size: u64,
    coins_per_utxo_size: Option<String>,
    price_mem: Option<f64>,
    price_step: Option<f64>,
    max_tx_ex_mem: Option<String>,
    max_tx_ex_steps: Option<String>,
    collateral_percent: Option<u64>,
    max_collateral_inputs: Option<u64>,
    cost_models_raw: Option<BTreeMap<String, Vec<i64>>>,
}

impl Blockfrost {
    pub fn new(config: &BlockfrostConfig, network: NetworkId) -> Self {
        info!("Using Blockfrost at {}", config.url);
        Self {
            client: Client::new(),
            url: config.url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            network,
        }
    }

    /// GET a path; `None` when Blockfrost answers 404
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self
            .client
            .get(format!("{}{}", self.url, path))
            .header("project_id", &self.project_id)
            .send()
            .await
            .with_context(|| format!("Failed to query Blockfrost {path}"))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(
                response.json::<T>().await.with_context(|| format!("Bad response from {path}"))?,
            )),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("Blockfrost {path} returned {status}: {body}")
            }
        }
    }
}

fn parse_value(amount: &[AmountJson]) -> Result<Value> {
    let mut value = Value::default();
    for entry in amount {
        let quantity: u64 = entry.quantity.parse().with_context(|| format!("Bad quantity {}", entry.quantity))?;
        if entry.unit == "lovelace" {
            value.set_lovelace(quantity);
            continue;
        }
        if entry.unit.len() < 56 {
            bail!("Bad asset unit {}", entry.unit);
        }
        let (policy, name) = entry.unit.split_at(56);
        let policy: Hash<28> = policy.parse()?;
        let name = AssetName::new(&hex::decode(name)?).ok_or_else(|| anyhow!("Asset name too long"))?;
        value = value.with_asset(policy, name, quantity);
    }
    Ok(value)
}

fn parse_utxo(json: UtxoJson, address: &Address) -> Result<UTxO> {
    let tx_hash: TxHash = json.tx_hash.parse()?;
    let mut output = TxOutput::new(address.clone(), parse_value(&json.amount)?);
    if let Some(inline) = json.inline_datum {
        output = output.with_datum(Datum::Inline(PlutusData::from_cbor(&hex::decode(inline)?)?));
    } else if let Some(hash) = json.data_hash {
        let hash: DatumHash = hash.parse()?;
        output = output.with_datum(Datum::Hash(hash));
    }
    Ok(UTxO::new(UTxOIdentifier::new(tx_hash, json.output_index), output))
}

fn parse_parameters(json: ParametersJson) -> Result<ProtocolParams> {
    let defaults = ProtocolParams::default();
    let parse_u64 = |field: Option<String>, fallback: u64| -> Result<u64> {
        field.map_or(Ok(fallback), |text| Ok(text.parse()?))
    };

    let mut cost_models = BTreeMap::new();
    for (language, costs) in json.cost_models_raw.unwrap_or_default() {
        let version = match language.as_str() {
            "PlutusV1" => PlutusVersion::V1,
            "PlutusV2" => PlutusVersion::V2,
            "PlutusV3" => PlutusVersion::V3,
            other => {
                warn!("Ignoring cost model for unknown language {other}");
                continue;
            }
        };
        cost_models.insert(version, costs);
    }

    Ok(ProtocolParams {
        min_fee_a: json.min_fee_a,
        min_fee_b: json.min_fee_b,
        max_tx_size: json.max_tx_size,
        coins_per_utxo_byte: parse_u64(json.coins_per_utxo_size, defaults.coins_per_utxo_byte)?,
        price_mem: json.price_mem.map(rational_number_from_f64).transpose()?.unwrap_or(defaults.price_mem),
        price_step: json.price_step.map(rational_number_from_f64).transpose()?.unwrap_or(defaults.price_step),
        max_tx_ex_units: ExUnits {
            mem: parse_u64(json.max_tx_ex_mem, defaults.max_tx_ex_units.mem)?,
            steps: parse_u64(json.max_tx_ex_steps, defaults.max_tx_ex_units.steps)?,
        },
        collateral_percentage: json.collateral_percent.unwrap_or(defaults.collateral_percentage),
        max_collateral_inputs: json.max_collateral_inputs.unwrap_or(defaults.max_collateral_inputs),
        default_redeemer_budget: defaults.default_redeemer_budget,
        cost_models,
    })
}

#[async_trait]
impl ChainBackend for Blockfrost {
    fn target(&self) -> TargetNetwork {
        TargetNetwork::Testnet
    }

    fn network_id(&self) -> NetworkId {
        self.network
    }

    fn slot_config(&self) -> SlotConfig {
        SlotConfig::default()
    }

    async fn utxos_at(&self, address: &Address) -> Result<Vec<UTxO>> {
        let bech32 = address.to_bech32()?;
        let mut utxos = Vec::new();
        for page in 1.. {
            let path = format!("/addresses/{bech32}/utxos?page={page}");
            let Some(batch) = self.get::<Vec<UtxoJson>>(&path).await? else {
                break;
            };
            let last_page = batch.len() < PAGE_SIZE;
            for json in batch {
                utxos.push(parse_utxo(json, address)?);
            }
            if last_page {
                break;
            }
        }
        debug!("{} UTxOs at {bech32}", utxos.len());
        Ok(utxos)
    }

    #[instrument(skip(self, tx), fields(tx_hash = %tx.id()))]
    async fn submit(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError> {
        let response = self
            .client
            .post(format!("{}/tx/submit", self.url))
            .header("project_id", &self.project_id)
            .header(header::CONTENT_TYPE, "application/cbor")
            .body(tx.to_cbor())
            .send()
            .await
            .context("Failed to reach Blockfrost")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read submit response")?;
        if status == StatusCode::BAD_REQUEST {
            warn!("Rejected: {body}");
            return Err(SubmitError::Rejected(body));
        }
        if !status.is_success() {
            return Err(anyhow!("Blockfrost submit returned {status}: {body}").into());
        }
        let tx_hash: String = serde_json::from_str(&body).context("Bad submit response")?;
        info!("Submitted");
        tx_hash.parse().map_err(|e| SubmitError::Backend(anyhow!("Bad transaction id {tx_hash}: {e}")))
    }

    async fn confirmations(&self, tx_hash: &TxHash) -> Result<Option<u64>> {
        let Some(tx) = self.get::<TxJson>(&format!("/txs/{tx_hash}")).await? else {
            return Ok(None);
        };
        let block = self
            .get::<BlockJson>(&format!("/blocks/{}", tx.block))
            .await?
            .ok_or_else(|| anyhow!("Block {} of transaction {tx_hash} not found", tx.block))?;
        // Blockfrost counts the blocks on top only
        Ok(Some(block.confirmations + 1))
    }

    async fn protocol_params(&self) -> Result<ProtocolParams> {
        let json = self
            .get::<ParametersJson>("/epochs/latest/parameters")
            .await?
            .ok_or_else(|| anyhow!("No protocol parameters for the latest epoch"))?;
        parse_parameters(json)
    }

    async fn now_ms(&self) -> Result<u64> {
        Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64)
    }
}
