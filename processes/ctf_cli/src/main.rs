use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use config::{Config, File};
use ctf_common::{
    address::NetworkId,
    configuration::{environment_source, Environment},
    crypto::SigningKey,
};
use ctf_module_levels::{level_names, run_named_level, Wallet};
use tracing::{debug, info};
use tracing_subscriber::{
    filter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _,
    Registry,
};

fn default_config_path() -> PathBuf {
    PathBuf::from(option_env!("CTF_DEFAULT_CONFIG").unwrap_or("ctf.toml"))
}

#[derive(clap::Parser)]
#[command(name = "ctf", about = "Run the Cardano CTF levels")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a level on the emulator and, if configured, on the testnet
    Run {
        /// Level name or number, e.g. `04_tipjar` or `4`
        level: String,

        /// Path to configuration.
        #[arg(long, default_value = default_config_path().into_os_string())]
        config: PathBuf,
    },

    /// List the available levels
    List,

    /// Print a fresh signing key and its testnet address
    GenerateKey,
}

fn load_environment(path: &Path) -> Result<Environment> {
    let config = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(environment_source())
        .build()?;
    let environment = Environment::from_config(&config)?;
    debug!(
        "Environment: network {:?}, emulator {}, testnet {}",
        environment.network, environment.use_emulator, environment.use_testnet
    );
    Ok(environment)
}

#[tokio::main]
pub async fn main() -> Result<()> {
    let args = Args::try_parse()?;

    // Standard logging using RUST_LOG for log levels default to INFO for events only
    let fmt_layer = fmt::layer()
        .with_filter(EnvFilter::from_default_env().add_directive(filter::LevelFilter::INFO.into()))
        .with_filter(filter::filter_fn(|meta| meta.is_event()));
    Registry::default().with(fmt_layer).init();

    match args.command {
        Command::Run { level, config } => {
            let environment = load_environment(&config)?;
            let outcome = run_named_level(&level, &environment).await?;
            info!("Level {level} finished: {outcome:?}");
            if !outcome.passed() {
                bail!("Level {level} did not pass");
            }
        }
        Command::List => {
            for name in level_names() {
                println!("{name}");
            }
        }
        Command::GenerateKey => {
            let wallet = Wallet::new(SigningKey::generate(), NetworkId::Testnet);
            println!("private-key = \"{}\"", wallet.key().to_bech32()?);
            println!("address: {}", wallet.address().to_bech32()?);
        }
    }
    Ok(())
}
