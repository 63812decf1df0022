//! The level lifecycle: setup, play, test, first on the emulator and then on
//! the testnet

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use ctf_common::{configuration::Environment, ProtocolParams, Value};
use ctf_module_chain_backend::{Blockfrost, ChainBackend, Emulator, ScriptEvaluator};
use tracing::{error, info, warn};

use crate::{blueprint::Blueprint, context::LevelContext, report::CheckReport, wallet::Wallet};

#[async_trait]
pub trait Level: Send + Sync {
    /// What setup hands to play and test
    type GameData: Send + Sync;

    /// What play hands to test
    type TestData: Send + Sync;

    /// Directory-style name, e.g. `00_hello_world`
    fn name(&self) -> &'static str;

    /// Solution record id, if solving the level is recorded on the testnet
    fn problem_id(&self) -> Option<i64> {
        None
    }

    /// Emulator stand-ins for the level's scripts, by blueprint title
    fn evaluators(&self) -> HashMap<String, Arc<dyn ScriptEvaluator>> {
        HashMap::new()
    }

    async fn setup(&self, ctx: &mut LevelContext) -> Result<Self::GameData>;

    async fn play(&self, ctx: &mut LevelContext, game: &Self::GameData) -> Result<Self::TestData>;

    /// Run the level's checks; failed checks go in the report, errors mean
    /// the checks could not run
    async fn test(
        &self,
        ctx: &mut LevelContext,
        game: &Self::GameData,
        test: &Self::TestData,
        report: &mut CheckReport,
    ) -> Result<()>;

    /// Printed after passing every check on the testnet
    fn completion_message(&self) -> String;
}

/// Pass/fail per target; `None` where the level did not run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelOutcome {
    pub emulator: Option<bool>,
    pub testnet: Option<bool>,
}

impl LevelOutcome {
    /// Ran somewhere and failed nowhere
    pub fn passed(&self) -> bool {
        let ran = self.emulator.is_some() || self.testnet.is_some();
        ran && self.emulator != Some(false) && self.testnet != Some(false)
    }
}

/// One full setup / play / test pass on the context's chain
pub async fn run_in_context<L: Level>(level: &L, mut ctx: LevelContext) -> Result<bool> {
    let game = level.setup(&mut ctx).await.context("Setup failed")?;
    let test_data = level.play(&mut ctx, &game).await.context("Play failed")?;

    ctx.reset_wallet();
    println!("================TESTS==================");
    let mut report = CheckReport::new(ctx.target());
    level.test(&mut ctx, &game, &test_data, &mut report).await.context("Tests could not run")?;

    let passed = report.all_passed();
    if passed {
        if let Some(problem_id) = level.problem_id() {
            if let Err(e) = ctx.submit_solution_record(problem_id).await {
                warn!("Solution record not submitted: {e:#}");
            }
        }
    }
    report.print_summary(&level.completion_message());
    Ok(passed)
}

async fn emulator_context<L: Level>(level: &L, environment: &Environment) -> Result<LevelContext> {
    let wallet = Wallet::generate(environment.network);
    let emulator = Emulator::new(
        [(wallet.address().clone(), Value::from_lovelace(environment.emulator_initial_lovelace))],
        ProtocolParams::default(),
    );
    LevelContext::new(
        Arc::new(emulator),
        environment.clone(),
        wallet,
        Blueprint::levels()?,
        level.evaluators(),
    )
    .await
}

async fn testnet_context<L: Level>(level: &L, environment: &Environment) -> Result<LevelContext> {
    let key = environment.testnet_signing_key()?.context("No private-key configured")?;
    let blockfrost = environment.blockfrost.as_ref().context("Blockfrost is not configured")?;
    let backend: Arc<dyn ChainBackend> = Arc::new(Blockfrost::new(blockfrost, environment.network));
    let wallet = Wallet::new(key, backend.network_id());
    LevelContext::new(backend, environment.clone(), wallet, Blueprint::levels()?, level.evaluators()).await
}

/// Run the level on the emulator and, if it passes there and the testnet is
/// enabled and configured, on the testnet
pub async fn run_level<L: Level>(level: &L, environment: &Environment) -> Result<LevelOutcome> {
    info!("Running level {}", level.name());
    let mut outcome = LevelOutcome::default();

    if environment.use_emulator {
        println!("Running on emulator...");
        let result = match emulator_context(level, environment).await {
            Ok(ctx) => run_in_context(level, ctx).await,
            Err(e) => Err(e),
        };
        let passed = result.unwrap_or_else(|e| {
            error!("{e:#}");
            println!("An error happened while running your code in the emulator.");
            false
        });
        outcome.emulator = Some(passed);
    } else {
        println!("Emulator is disabled, skipping...");
    }

    if outcome.emulator == Some(false) {
        println!(
            "Tests did not pass on emulator, skipping the testnet. To force testnet, set use-emulator in config to false."
        );
    } else if !environment.use_testnet {
        println!("Testnet is disabled, skipping...");
    } else if !environment.testnet_configured() {
        println!("Testnet is not configured, finish your configuration according to the README");
    } else {
        println!("Running the task on testnet now, this will take some time...");
        let ctx = testnet_context(level, environment).await?;
        let passed = run_in_context(level, ctx).await.unwrap_or_else(|e| {
            error!("{e:#}");
            println!("An error happened while running your code on the testnet.");
            false
        });
        outcome.testnet = Some(passed);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, None => false; "nothing ran")]
    #[test_case(Some(true), None => true; "emulator only")]
    #[test_case(Some(true), Some(false) => false; "testnet failed")]
    #[test_case(None, Some(true) => true; "testnet only")]
    #[test_case(Some(false), None => false; "emulator failed")]
    fn outcome_passes(emulator: Option<bool>, testnet: Option<bool>) -> bool {
        LevelOutcome { emulator, testnet }.passed()
    }

    struct Trivial;

    #[async_trait]
    impl Level for Trivial {
        type GameData = u64;
        type TestData = ();

        fn name(&self) -> &'static str {
            "trivial"
        }

        async fn setup(&self, ctx: &mut LevelContext) -> Result<u64> {
            ctx.wallet_balance().await
        }

        async fn play(&self, _ctx: &mut LevelContext, _game: &u64) -> Result<()> {
            Ok(())
        }

        async fn test(
            &self,
            ctx: &mut LevelContext,
            game: &u64,
            _test: &(),
            report: &mut CheckReport,
        ) -> Result<()> {
            let balance = ctx.wallet_balance().await?;
            report.check(balance == *game, "balance unchanged", "balance changed");
            Ok(())
        }

        fn completion_message(&self) -> String {
            "done".to_string()
        }
    }

    #[tokio::test]
    async fn testnet_is_skipped_when_disabled() {
        let environment = Environment {
            use_testnet: false,
            ..Default::default()
        };
        let outcome = run_level(&Trivial, &environment).await.unwrap();
        assert_eq!(
            outcome,
            LevelOutcome {
                emulator: Some(true),
                testnet: None
            }
        );
    }

    #[tokio::test]
    async fn unconfigured_testnet_is_skipped() {
        let environment = Environment {
            use_testnet: true,
            ..Default::default()
        };
        let outcome = run_level(&Trivial, &environment).await.unwrap();
        assert!(outcome.passed());
        assert_eq!(outcome.testnet, None);
    }

    #[tokio::test]
    async fn disabled_emulator_runs_nothing_without_testnet() {
        let environment = Environment {
            use_emulator: false,
            ..Default::default()
        };
        let outcome = run_level(&Trivial, &environment).await.unwrap();
        assert!(!outcome.passed());
    }
}
