//! Waiting for a submitted transaction to reach a confirmation depth

use std::time::Duration;

use anyhow::Result;
use ctf_common::TxHash;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::backend::ChainBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed { depth: u64, polls: u32 },
    TimedOut { polls: u32 },
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed { .. })
    }
}

/// Poll `backend` every `poll_interval` until `tx_hash` is `target_depth`
/// blocks deep, giving up after `max_wait`. The backend advances before each
/// poll.
pub async fn await_confirmations(
    backend: &dyn ChainBackend,
    tx_hash: &TxHash,
    target_depth: u64,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<Confirmation> {
    let mut polls = 0u32;
    let watch = async {
        loop {
            backend.advance().await?;
            let depth = backend.confirmations(tx_hash).await?;
            polls += 1;
            debug!("Transaction {tx_hash} at depth {depth:?} after {polls} polls");
            if let Some(depth) = depth.filter(|depth| *depth >= target_depth) {
                return Ok::<u64, anyhow::Error>(depth);
            }
            sleep(poll_interval).await;
        }
    };

    let outcome = timeout(max_wait, watch).await;
    match outcome {
        Ok(Ok(depth)) => {
            info!("Transaction {tx_hash} confirmed at depth {depth}");
            Ok(Confirmation::Confirmed { depth, polls })
        }
        Ok(Err(error)) => Err(error),
        Err(_) => Ok(Confirmation::TimedOut { polls }),
    }
}
