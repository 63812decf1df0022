//! In-memory ledger standing in for a real chain

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use ctf_common::{
    configuration::TargetNetwork,
    validation::{LedgerValidationError, ScriptPurpose, SubmitError},
    Address, Datum, Hash, PlutusData, ProtocolParams, RedeemerTag, ScriptHash, SignedTransaction,
    SlotConfig, Transaction, TxHash, TxOutput, UTxO, UTxOIdentifier, Value,
};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::{backend::ChainBackend, validations};

/// Slots between two emulated blocks
pub const SLOTS_PER_BLOCK: u64 = 20;

/// What a script sees when it runs
pub struct ScriptContext<'a> {
    pub purpose: ScriptPurpose,

    /// The output being spent, for spending scripts
    pub own_input: Option<&'a UTxO>,

    /// Datum of the output being spent, inline or from the witness set
    pub datum: Option<&'a PlutusData>,
    pub redeemer: &'a PlutusData,
    pub tx: &'a Transaction,

    /// All spent outputs, sorted by identifier
    pub inputs: &'a [UTxO],

    /// Converts the transaction's validity slots to POSIX time
    pub slot_config: SlotConfig,
}

impl ScriptContext<'_> {
    /// POSIX time the validity interval ends at, if it has an end
    pub fn valid_to_ms(&self) -> Option<u64> {
        self.tx.body().ttl.map(|slot| self.slot_config.time_of(slot))
    }

    /// POSIX time the validity interval starts at, if it has a start
    pub fn valid_from_ms(&self) -> Option<u64> {
        self.tx.body().validity_start.map(|slot| self.slot_config.time_of(slot))
    }

    pub fn signed_by(&self, key_hash: &[u8]) -> bool {
        self.tx.body().required_signers.iter().any(|signer| signer.as_ref() == key_hash)
    }
}

/// Off-chain stand-in for a script's on-chain logic
pub trait ScriptEvaluator: Send + Sync {
    /// `Err` carries the reason the script failed
    fn evaluate(&self, context: &ScriptContext<'_>) -> Result<(), String>;

    /// The evaluator for this script with its parameters bound. `None` when
    /// the script takes no parameters.
    fn apply_params(&self, _params: &[PlutusData]) -> Option<Arc<dyn ScriptEvaluator>> {
        None
    }
}

#[derive(Default)]
struct Ledger {
    utxos: BTreeMap<UTxOIdentifier, UTxO>,

    /// Accepted transactions waiting for the next block
    mempool: Vec<SignedTransaction>,

    /// Block height each applied transaction landed in
    included: HashMap<TxHash, u64>,
    height: u64,
    slot: u64,
}

impl Ledger {
    fn pending_spent(&self) -> BTreeSet<UTxOIdentifier> {
        self.mempool.iter().flat_map(|tx| tx.tx().body().inputs.iter().copied()).collect()
    }

    fn is_pending(&self, tx_hash: &TxHash) -> bool {
        self.mempool.iter().any(|tx| tx.id() == *tx_hash)
    }

    fn apply(&mut self, tx: SignedTransaction) {
        let tx_hash = tx.id();
        let body = tx.tx().body();
        for input in &body.inputs {
            self.utxos.remove(input);
        }
        for (index, output) in body.outputs.iter().enumerate() {
            let id = UTxOIdentifier::new(tx_hash, index as u16);
            self.utxos.insert(id, UTxO::new(id, output.clone()));
        }
        self.included.insert(tx_hash, self.height);
    }
}

/// Emulated chain. Submissions are checked against the ledger rules and the
/// registered script evaluators, wait in a mempool, and land in the next
/// block produced by [`Emulator::advance`].
pub struct Emulator {
    ledger: RwLock<Ledger>,
    evaluators: RwLock<HashMap<ScriptHash, Arc<dyn ScriptEvaluator>>>,
    params: ProtocolParams,
    slot_config: SlotConfig,
}

impl Emulator {
    /// Genesis outputs carry the all-zero transaction id
    pub fn new(genesis: impl IntoIterator<Item = (Address, Value)>, params: ProtocolParams) -> Self {
        let mut ledger = Ledger::default();
        for (index, (address, value)) in genesis.into_iter().enumerate() {
            let id = UTxOIdentifier::new(Hash::default(), index as u16);
            ledger.utxos.insert(id, UTxO::new(id, TxOutput::new(address, value)));
        }
        info!("Emulator started with {} genesis outputs", ledger.utxos.len());

        Self {
            ledger: RwLock::new(ledger),
            evaluators: RwLock::new(HashMap::new()),
            params,
            slot_config: SlotConfig::default(),
        }
    }

    pub async fn block_height(&self) -> u64 {
        self.ledger.read().await.height
    }

    pub async fn current_slot(&self) -> u64 {
        self.ledger.read().await.slot
    }

    /// Produce `count` blocks
    pub async fn await_block(&self, count: u64) {
        let mut ledger = self.ledger.write().await;
        for _ in 0..count {
            ledger.height += 1;
            ledger.slot += SLOTS_PER_BLOCK;
            let pending = std::mem::take(&mut ledger.mempool);
            if !pending.is_empty() {
                debug!("Block {} includes {} transactions", ledger.height, pending.len());
            }
            for tx in pending {
                ledger.apply(tx);
            }
        }
    }

    /// Move the clock forward without producing blocks
    pub async fn await_slot(&self, slots: u64) {
        self.ledger.write().await.slot += slots;
    }

    async fn validate(&self, ledger: &Ledger, tx: &SignedTransaction) -> Result<(), Box<LedgerValidationError>> {
        let body = tx.tx().body();
        if body.inputs.is_empty() {
            return Err(Box::new(LedgerValidationError::NoInputs));
        }

        let pending_spent = ledger.pending_spent();
        let inputs = validations::resolve_inputs(&body.inputs, &ledger.utxos, &pending_spent)?;
        let collateral = validations::resolve_inputs(&body.collateral, &ledger.utxos, &pending_spent)?;

        validations::validate_validity_interval(tx, ledger.slot)?;
        validations::validate_size_and_fee(tx, &self.params)?;
        validations::validate_conservation(tx, &inputs)?;
        validations::validate_output_minimums(tx, &self.params)?;
        validations::validate_vkey_witnesses(tx, &inputs, &collateral)?;
        let needed = validations::validate_script_witnesses(tx, &inputs, &self.params)?;
        validations::validate_collateral(tx, &collateral, &self.params)?;

        let evaluators = self.evaluators.read().await;
        let witnesses = tx.tx().witnesses();
        for (pointer, script_hash) in needed {
            let Some(evaluator) = evaluators.get(&script_hash) else {
                debug!("No evaluator for script {script_hash}, accepting");
                continue;
            };
            let Some(redeemer) =
                witnesses.redeemers.iter().find(|r| r.redeemer_pointer() == pointer)
            else {
                return Err(Box::new(LedgerValidationError::MissingRedeemer(pointer)));
            };

            let (purpose, own_input, datum) = match pointer.tag {
                RedeemerTag::Spend => {
                    let utxo = &inputs[pointer.index as usize];
                    let datum = match &utxo.output.datum {
                        Some(Datum::Inline(data)) => Some(data),
                        Some(Datum::Hash(hash)) => {
                            witnesses.datums.iter().find(|datum| datum.hash() == *hash)
                        }
                        None => None,
                    };
                    (ScriptPurpose::Spend(utxo.id), Some(utxo), datum)
                }
                RedeemerTag::Mint => (ScriptPurpose::Mint(script_hash), None, None),
            };

            let context = ScriptContext {
                purpose,
                own_input,
                datum,
                redeemer: &redeemer.data,
                tx: tx.tx(),
                inputs: &inputs,
                slot_config: self.slot_config,
            };
            evaluator.evaluate(&context).map_err(|reason| {
                Box::new(LedgerValidationError::ScriptFailed {
                    script_hash,
                    reason,
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChainBackend for Emulator {
    fn target(&self) -> TargetNetwork {
        TargetNetwork::Emulator
    }

    fn slot_config(&self) -> SlotConfig {
        self.slot_config
    }

    async fn utxos_at(&self, address: &Address) -> Result<Vec<UTxO>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.utxos.values().filter(|utxo| utxo.output.address == *address).cloned().collect())
    }

    #[instrument(skip(self, tx), fields(tx_hash = %tx.id()))]
    async fn submit(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError> {
        let mut ledger = self.ledger.write().await;
        let tx_hash = tx.id();
        if ledger.is_pending(&tx_hash) || ledger.included.contains_key(&tx_hash) {
            return Ok(tx_hash);
        }
        if let Err(error) = self.validate(&ledger, tx).await {
            warn!("Rejected: {error}");
            return Err((*error).into());
        }
        ledger.mempool.push(tx.clone());
        info!("Accepted into mempool");
        Ok(tx_hash)
    }

    async fn confirmations(&self, tx_hash: &TxHash) -> Result<Option<u64>> {
        let ledger = self.ledger.read().await;
        if let Some(height) = ledger.included.get(tx_hash) {
            return Ok(Some(ledger.height - height + 1));
        }
        Ok(ledger.is_pending(tx_hash).then_some(0))
    }

    async fn protocol_params(&self) -> Result<ProtocolParams> {
        Ok(self.params.clone())
    }

    async fn now_ms(&self) -> Result<u64> {
        Ok(self.slot_config.time_of(self.current_slot().await))
    }

    async fn advance(&self) -> Result<()> {
        self.await_block(1).await;
        Ok(())
    }

    async fn register_evaluator(&self, script_hash: ScriptHash, evaluator: Arc<dyn ScriptEvaluator>) {
        debug!("Registered evaluator for script {script_hash}");
        self.evaluators.write().await.insert(script_hash, evaluator);
    }
}
