//! The query and submission interface every chain backend implements

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ctf_common::{
    configuration::TargetNetwork, validation::SubmitError, Address, NetworkId, ProtocolParams,
    ScriptHash, SignedTransaction, SlotConfig, TxHash, UTxO,
};

use crate::emulator::ScriptEvaluator;

#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Which kind of chain this is
    fn target(&self) -> TargetNetwork;

    /// Network addresses are built for
    fn network_id(&self) -> NetworkId {
        NetworkId::Testnet
    }

    fn slot_config(&self) -> SlotConfig;

    /// Unspent outputs currently sitting at an address
    async fn utxos_at(&self, address: &Address) -> Result<Vec<UTxO>>;

    /// Submit a signed transaction, returning its id
    async fn submit(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError>;

    /// Number of blocks, including its own, on top of which the transaction
    /// sits. `Some(0)` is pending; `None` is unknown to the backend.
    async fn confirmations(&self, tx_hash: &TxHash) -> Result<Option<u64>>;

    async fn protocol_params(&self) -> Result<ProtocolParams>;

    /// Current chain time in POSIX milliseconds
    async fn now_ms(&self) -> Result<u64>;

    /// Let the chain make progress. Live chains progress on their own.
    async fn advance(&self) -> Result<()> {
        Ok(())
    }

    /// Install the off-chain stand-in for a script's on-chain logic. Live
    /// chains run the real compiled script and ignore this.
    async fn register_evaluator(&self, _script_hash: ScriptHash, _evaluator: Arc<dyn ScriptEvaluator>) {}
}
