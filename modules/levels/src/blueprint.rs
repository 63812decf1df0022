//! Typed registry over a compiled contract blueprint (`plutus.json`)

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use ctf_common::{
    configuration::TargetNetwork, validation::TxBuildError, PlutusData, PlutusScript,
    PlutusVersion, ScriptHash,
};
use minicbor::Encoder;
use serde::Deserialize;
use tracing::debug;

/// Blueprint shipped with the levels
pub const LEVELS_BLUEPRINT: &str = include_str!("../blueprints/plutus.json");

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlueprintJson {
    preamble: PreambleJson,
    validators: Vec<ValidatorJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreambleJson {
    plutus_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidatorJson {
    title: String,
    compiled_code: String,
    hash: Option<ScriptHash>,
    #[serde(default)]
    parameters: Vec<serde_json::Value>,
}

/// A compiled validator or minting policy, possibly awaiting parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintValidator {
    pub title: String,
    pub script: PlutusScript,
    pub arity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Blueprint {
    validators: BTreeMap<String, BlueprintValidator>,
}

impl Blueprint {
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: BlueprintJson = serde_json::from_str(json).context("Invalid blueprint")?;
        let version = match parsed.preamble.plutus_version.as_deref() {
            None | Some("v2") => PlutusVersion::V2,
            Some("v1") => PlutusVersion::V1,
            Some("v3") => PlutusVersion::V3,
            Some(other) => bail!("Unsupported Plutus version {other}"),
        };

        let mut validators = BTreeMap::new();
        for validator in parsed.validators {
            let code = hex::decode(&validator.compiled_code)
                .with_context(|| format!("Bad compiled code for {}", validator.title))?;
            let script = PlutusScript::new(version, code);
            let arity = validator.parameters.len();
            if let (0, Some(expected)) = (arity, validator.hash) {
                if script.hash() != expected {
                    bail!(
                        "Blueprint hash {expected} of {} does not match its code ({})",
                        validator.title,
                        script.hash()
                    );
                }
            }
            validators.insert(
                validator.title.clone(),
                BlueprintValidator {
                    title: validator.title,
                    script,
                    arity,
                },
            );
        }
        debug!("Loaded blueprint with {} validators", validators.len());
        Ok(Self { validators })
    }

    pub fn levels() -> Result<Self> {
        Self::from_json(LEVELS_BLUEPRINT)
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }

    pub fn resolve(&self, name: &str) -> Result<&BlueprintValidator, TxBuildError> {
        self.validators.get(name).ok_or_else(|| TxBuildError::ScriptNotFound(name.to_string()))
    }

    /// The script ready for use on `target`, with `params` applied in order.
    ///
    /// Parameterised validators are only available on the emulator, where
    /// scripts run as registered evaluators keyed by hash. Real parameter
    /// application rewrites the flat-encoded program, which is not done here,
    /// so the testnet gets an error instead of an address nobody can spend
    /// from.
    pub fn instantiate(
        &self,
        name: &str,
        params: &[PlutusData],
        target: TargetNetwork,
    ) -> Result<PlutusScript, TxBuildError> {
        let validator = self.resolve(name)?;
        if validator.arity != params.len() {
            return Err(TxBuildError::ParameterArity {
                name: name.to_string(),
                expected: validator.arity,
                given: params.len(),
            });
        }
        if params.is_empty() {
            return Ok(validator.script.clone());
        }
        if !target.is_emulator() {
            return Err(TxBuildError::ParametersNeedEmulator(name.to_string()));
        }
        Ok(bind_params(&validator.script, params))
    }
}

/// Emulator stand-in for parameter application: `[code, [params...]]`, so
/// the hash depends on both the code and the parameters
fn bind_params(script: &PlutusScript, params: &[PlutusData]) -> PlutusScript {
    let mut e = Encoder::new(Vec::new());
    encode_bound(&script.code, params, &mut e).expect("infallible");
    PlutusScript::new(script.version, e.into_writer())
}

fn encode_bound(
    code: &[u8],
    params: &[PlutusData],
    e: &mut Encoder<Vec<u8>>,
) -> Result<(), minicbor::encode::Error<std::convert::Infallible>> {
    e.array(2)?.bytes(code)?.array(params.len() as u64)?;
    for param in params {
        e.encode(param)?;
    }
    Ok(())
}
