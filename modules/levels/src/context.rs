//! Everything a level's setup, play and test phases act through

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{bail, Context as _, Result};
use ctf_common::{
    configuration::{Environment, TargetNetwork},
    validation::SubmitError,
    Address, Lovelace, NetworkId, PlutusData, PlutusScript, ProtocolParams, Transaction, TxHash,
    UTxO, Value,
};
use ctf_module_chain_backend::{await_confirmations, ChainBackend, Confirmation, ScriptEvaluator};
use ctf_module_tx_builder::{balance, BalanceContext, OutputDatum, TransactionDraft};
use tracing::{debug, info};

use crate::{blueprint::Blueprint, wallet::Wallet};

const SOLUTION_RECORD_VALIDATOR: &str = "solution_record.record";
const SOLUTION_RECORD_TAG: &str = "CTF2: Solution Recording";

/// Capability object handed to every level phase: the chain backend, the
/// run environment, the active wallet and the script registry
pub struct LevelContext {
    backend: Arc<dyn ChainBackend>,
    environment: Environment,
    params: ProtocolParams,
    blueprint: Blueprint,
    evaluators: HashMap<String, Arc<dyn ScriptEvaluator>>,

    /// Wallet the run started with
    main_wallet: Wallet,

    /// Wallet currently signing and paying
    wallet: Wallet,
}

impl LevelContext {
    pub async fn new(
        backend: Arc<dyn ChainBackend>,
        environment: Environment,
        wallet: Wallet,
        blueprint: Blueprint,
        evaluators: HashMap<String, Arc<dyn ScriptEvaluator>>,
    ) -> Result<Self> {
        let params = backend.protocol_params().await.context("Failed to fetch protocol parameters")?;
        Ok(Self {
            backend,
            environment,
            params,
            blueprint,
            evaluators,
            main_wallet: wallet.clone(),
            wallet,
        })
    }

    pub fn target(&self) -> TargetNetwork {
        self.backend.target()
    }

    pub fn network_id(&self) -> NetworkId {
        self.backend.network_id()
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn backend(&self) -> &dyn ChainBackend {
        self.backend.as_ref()
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn wallet_address(&self) -> &Address {
        self.wallet.address()
    }

    /// Empty transaction draft on this chain's slot clock
    pub fn new_tx(&self) -> TransactionDraft {
        TransactionDraft::new(self.backend.slot_config())
    }

    /// Balance the draft against the active wallet
    pub async fn complete(&self, draft: TransactionDraft) -> Result<Transaction> {
        let context = BalanceContext {
            wallet_utxos: self.backend.utxos_at(self.wallet.address()).await?,
            change_address: self.wallet.address().clone(),
            params: self.params.clone(),
        };
        Ok(balance(draft, &context)?)
    }

    /// Sign with the active wallet and submit
    pub async fn sign_and_submit(&self, tx: Transaction) -> Result<TxHash, SubmitError> {
        let signed = tx.sign(self.wallet.key());
        self.backend.submit(&signed).await
    }

    /// Wait until the transaction reaches the configured depth
    pub async fn await_tx(&self, tx_hash: &TxHash) -> Result<()> {
        let poll_interval = match self.target() {
            TargetNetwork::Emulator => Duration::ZERO,
            TargetNetwork::Testnet => self.environment.poll_interval,
        };
        if !self.target().is_emulator() {
            info!("Waiting for {} tx confirmations...", self.environment.confirmations);
        }
        match await_confirmations(
            self.backend.as_ref(),
            tx_hash,
            self.environment.confirmations,
            poll_interval,
            self.environment.confirmation_timeout,
        )
        .await?
        {
            Confirmation::Confirmed { .. } => Ok(()),
            Confirmation::TimedOut { polls } => {
                bail!("Transaction {tx_hash} was not confirmed after {polls} polls")
            }
        }
    }

    /// Complete, sign, submit and wait for confirmation
    pub async fn submit_and_confirm(&self, draft: TransactionDraft) -> Result<TxHash> {
        let tx = self.complete(draft).await?;
        let tx_hash = self.sign_and_submit(tx).await?;
        self.await_tx(&tx_hash).await?;
        Ok(tx_hash)
    }

    pub async fn utxos_at(&self, address: &Address) -> Result<Vec<UTxO>> {
        self.backend.utxos_at(address).await
    }

    /// Lovelace held by the active wallet
    pub async fn wallet_balance(&self) -> Result<Lovelace> {
        let utxos = self.backend.utxos_at(self.wallet.address()).await?;
        Ok(utxos.iter().map(|utxo| utxo.output.value.lovelace()).sum())
    }

    /// Act through another wallet from now on
    pub fn select_wallet(&mut self, wallet: Wallet) {
        debug!("Selected wallet {}", wallet.address());
        self.wallet = wallet;
    }

    /// Back to the wallet the run started with
    pub fn reset_wallet(&mut self) {
        self.wallet = self.main_wallet.clone();
    }

    /// Pay lovelace from the active wallet and wait for confirmation
    pub async fn fund_wallet(&self, address: &Address, lovelace: Lovelace) -> Result<TxHash> {
        let draft = self.new_tx().pay_to_address(address, Value::from_lovelace(lovelace));
        self.submit_and_confirm(draft).await
    }

    /// Validator from the blueprint with its parameters applied. On the
    /// emulator the level's evaluator for it is installed too, bound to the
    /// same parameters.
    pub async fn validator(&self, name: &str, params: &[PlutusData]) -> Result<PlutusScript> {
        let script = self.blueprint.instantiate(name, params, self.target())?;
        if let Some(evaluator) = self.evaluators.get(name) {
            let evaluator = evaluator.apply_params(params).unwrap_or_else(|| evaluator.clone());
            self.backend.register_evaluator(script.hash(), evaluator).await;
        }
        Ok(script)
    }

    pub fn validator_address(&self, script: &PlutusScript) -> Address {
        script.address(self.backend.network_id())
    }

    pub async fn now_ms(&self) -> Result<u64> {
        self.backend.now_ms().await
    }

    /// Block until the chain clock reaches `posix_ms`. The emulator produces
    /// blocks to get there; a live chain is polled.
    pub async fn wait_until(&self, posix_ms: u64) -> Result<()> {
        let mut now = self.now_ms().await?;
        if now < posix_ms {
            info!("Waiting {}s for the chain to reach {posix_ms}", (posix_ms - now) / 1000);
        }
        while now < posix_ms {
            match self.target() {
                TargetNetwork::Emulator => self.backend.advance().await?,
                TargetNetwork::Testnet => {
                    let remaining = Duration::from_millis(posix_ms - now);
                    let poll = self.environment.poll_interval.max(Duration::from_secs(1));
                    tokio::time::sleep(remaining.min(poll)).await;
                }
            }
            now = self.now_ms().await?;
        }
        Ok(())
    }

    /// Transaction id line, with an explorer link on the testnet
    pub fn tx_details(&self, tx_hash: &TxHash) -> String {
        format!("\n\tTx ID: {tx_hash}\n\t{}", self.explorer_link(tx_hash))
    }

    pub fn explorer_link(&self, tx_hash: &TxHash) -> String {
        match self.target() {
            TargetNetwork::Emulator => String::new(),
            TargetNetwork::Testnet => format!(
                "Check details at https://preview.cardanoscan.io/transaction/{tx_hash} "
            ),
        }
    }

    /// Record a solved level on the testnet. Nothing to do on the emulator.
    pub async fn submit_solution_record(&self, problem_id: i64) -> Result<()> {
        if self.target().is_emulator() {
            return Ok(());
        }
        let validator =
            self.validator(SOLUTION_RECORD_VALIDATOR, &[PlutusData::bytes(SOLUTION_RECORD_TAG)]).await?;
        let datum = PlutusData::constr(
            0,
            vec![
                PlutusData::integer(problem_id),
                PlutusData::integer(self.now_ms().await? as i64),
                PlutusData::bytes(self.wallet.address().to_bech32()?),
            ],
        );
        let draft = self.new_tx().pay_to_contract(
            &self.validator_address(&validator),
            OutputDatum::Inline(datum),
            Value::default(),
        );
        let tx = self.complete(draft).await?;
        self.sign_and_submit(tx).await?;
        println!("Submitting solution record on the testnet.");
        Ok(())
    }
}

/// Only the UTxOs created by the given transaction
pub fn filter_utxos_by_tx_hash(utxos: Vec<UTxO>, tx_hash: &TxHash) -> Vec<UTxO> {
    utxos.into_iter().filter(|utxo| utxo.id.tx_hash == *tx_hash).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_common::{crypto::SigningKey, Hash, TxOutput, UTxOIdentifier};
    use ctf_module_chain_backend::Emulator;

    const ADA: u64 = 1_000_000;

    fn wallet(seed: u8) -> Wallet {
        Wallet::new(SigningKey::from_seed([seed; 32]), NetworkId::Testnet)
    }

    async fn context() -> LevelContext {
        let main = wallet(1);
        let emulator = Emulator::new(
            [(main.address().clone(), Value::from_lovelace(1_000 * ADA))],
            ProtocolParams::default(),
        );
        LevelContext::new(
            Arc::new(emulator),
            Environment::default(),
            main,
            Blueprint::levels().unwrap(),
            HashMap::new(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn filters_by_creating_transaction() {
        let address = wallet(1).address().clone();
        let utxo = |byte: u8| {
            UTxO::new(
                UTxOIdentifier::new(Hash::new([byte; 32]), 0),
                TxOutput::new(address.clone(), Value::from_lovelace(ADA)),
            )
        };
        let kept = filter_utxos_by_tx_hash(vec![utxo(1), utxo(2), utxo(1)], &Hash::new([1; 32]));
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn fund_switch_and_reset_wallets() {
        let mut ctx = context().await;
        let second = wallet(2);
        ctx.fund_wallet(second.address(), 50 * ADA).await.unwrap();
        let main_balance = ctx.wallet_balance().await.unwrap();
        assert!(main_balance < 950 * ADA && main_balance > 949 * ADA);

        ctx.select_wallet(second.clone());
        assert_eq!(ctx.wallet_balance().await.unwrap(), 50 * ADA);
        ctx.fund_wallet(wallet(3).address(), 10 * ADA).await.unwrap();
        assert!(ctx.wallet_balance().await.unwrap() < 40 * ADA);

        ctx.reset_wallet();
        assert_eq!(ctx.wallet_address(), wallet(1).address());
        assert_eq!(ctx.wallet_balance().await.unwrap(), main_balance);
    }

    #[tokio::test]
    async fn emulator_links_are_empty() {
        let ctx = context().await;
        let details = ctx.tx_details(&Hash::new([3; 32]));
        assert!(details.contains("Tx ID: 0303"));
        assert!(!details.contains("cardanoscan"));
    }

    #[tokio::test]
    async fn unknown_validator_is_an_error() {
        let ctx = context().await;
        let err = ctx.validator("missing.missing", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Script with a name missing.missing was not found");
    }

    #[tokio::test]
    async fn waiting_moves_the_emulator_clock() {
        let ctx = context().await;
        let target = ctx.now_ms().await.unwrap() + 3_600_000;
        ctx.wait_until(target).await.unwrap();
        let now = ctx.now_ms().await.unwrap();
        assert!(now >= target && now < target + 20_000);

        // Already past: returns at once
        ctx.wait_until(target).await.unwrap();
        assert_eq!(ctx.now_ms().await.unwrap(), now);
    }

    #[tokio::test]
    async fn solution_record_is_skipped_on_the_emulator() {
        let ctx = context().await;
        let before = ctx.wallet_balance().await.unwrap();
        ctx.submit_solution_record(0).await.unwrap();
        assert_eq!(ctx.wallet_balance().await.unwrap(), before);
    }
}
