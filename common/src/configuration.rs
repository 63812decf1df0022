use anyhow::{Context, Result};
use config::{Case, Config};
use serde::Deserialize;
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use crate::{address::NetworkId, asset::Lovelace, crypto::SigningKey};

pub const CONFIG_KEY_NETWORK: &str = "network";
pub const CONFIG_KEY_USE_EMULATOR: &str = "use-emulator";
pub const CONFIG_KEY_USE_TESTNET: &str = "use-testnet";
pub const CONFIG_KEY_CONFIRMATIONS: &str = "confirmations";
pub const CONFIG_KEY_POLL_INTERVAL_MS: &str = "poll-interval-ms";
pub const CONFIG_KEY_CONFIRMATION_TIMEOUT_SECS: &str = "confirmation-timeout-secs";
pub const CONFIG_KEY_PRIVATE_KEY: &str = "private-key";
pub const CONFIG_KEY_BLOCKFROST_URL: &str = "blockfrost.url";
pub const CONFIG_KEY_BLOCKFROST_PROJECT_ID: &str = "blockfrost.project-id";
pub const CONFIG_KEY_EMULATOR_INITIAL_LOVELACE: &str = "emulator.initial-lovelace";

pub const ENVIRONMENT_PREFIX: &str = "CTF";

const DEFAULT_CONFIRMATIONS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_BLOCKFROST_URL: &str = "https://cardano-preview.blockfrost.io/api/v0";
const DEFAULT_EMULATOR_INITIAL_LOVELACE: Lovelace = 100_000_000_000_000;

/// Where a level is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetNetwork {
    Emulator,
    Testnet,
}

impl TargetNetwork {
    pub fn is_emulator(&self) -> bool {
        matches!(self, TargetNetwork::Emulator)
    }
}

impl Display for TargetNetwork {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TargetNetwork::Emulator => write!(f, "emulator"),
            TargetNetwork::Testnet => write!(f, "testnet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockfrostConfig {
    pub url: String,
    pub project_id: String,
}

/// Everything a level run needs to know about where and how to run.
/// Built once from configuration and passed explicitly.
#[derive(Debug, Clone)]
pub struct Environment {
    pub network: NetworkId,
    pub use_emulator: bool,
    pub use_testnet: bool,

    /// Depth a transaction must reach before it counts as confirmed
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,

    /// Testnet wallet key, bech32 or hex
    pub private_key: Option<String>,
    pub blockfrost: Option<BlockfrostConfig>,
    pub emulator_initial_lovelace: Lovelace,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            network: NetworkId::Testnet,
            use_emulator: true,
            use_testnet: false,
            confirmations: DEFAULT_CONFIRMATIONS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
            private_key: None,
            blockfrost: None,
            emulator_initial_lovelace: DEFAULT_EMULATOR_INITIAL_LOVELACE,
        }
    }
}

/// Configuration source for `CTF_*` variables. `__` descends into a table
/// and single underscores map to the kebab-case file keys, so
/// `CTF_POLL_INTERVAL_MS` sets `poll-interval-ms` and
/// `CTF_BLOCKFROST__PROJECT_ID` sets `blockfrost.project-id`.
pub fn environment_source() -> config::Environment {
    config::Environment::with_prefix(ENVIRONMENT_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .convert_case(Case::Kebab)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Environment {
    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = Self::default();

        let blockfrost = non_empty(config.get_string(CONFIG_KEY_BLOCKFROST_PROJECT_ID).ok()).map(
            |project_id| BlockfrostConfig {
                url: config
                    .get_string(CONFIG_KEY_BLOCKFROST_URL)
                    .unwrap_or_else(|_| DEFAULT_BLOCKFROST_URL.to_string()),
                project_id,
            },
        );

        let private_key = non_empty(config.get_string(CONFIG_KEY_PRIVATE_KEY).ok());
        if let Some(key) = &private_key {
            SigningKey::from_text(key).context("Invalid private-key in configuration")?;
        }

        Ok(Self {
            network: config.get::<NetworkId>(CONFIG_KEY_NETWORK).unwrap_or(defaults.network),
            use_emulator: config.get_bool(CONFIG_KEY_USE_EMULATOR).unwrap_or(defaults.use_emulator),
            use_testnet: config.get_bool(CONFIG_KEY_USE_TESTNET).unwrap_or(defaults.use_testnet),
            confirmations: config
                .get::<u64>(CONFIG_KEY_CONFIRMATIONS)
                .unwrap_or(defaults.confirmations),
            poll_interval: config
                .get::<u64>(CONFIG_KEY_POLL_INTERVAL_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            confirmation_timeout: config
                .get::<u64>(CONFIG_KEY_CONFIRMATION_TIMEOUT_SECS)
                .map(Duration::from_secs)
                .unwrap_or(defaults.confirmation_timeout),
            private_key,
            blockfrost,
            emulator_initial_lovelace: config
                .get::<u64>(CONFIG_KEY_EMULATOR_INITIAL_LOVELACE)
                .unwrap_or(defaults.emulator_initial_lovelace),
        })
    }

    /// Testnet runs need both a Blockfrost project and a funded key
    pub fn testnet_configured(&self) -> bool {
        self.blockfrost.is_some() && self.private_key.is_some()
    }

    pub fn testnet_signing_key(&self) -> Result<Option<SigningKey>> {
        self.private_key.as_deref().map(SigningKey::from_text).transpose()
    }
}
