//! Error taxonomy for transaction construction, submission and ledger checks

use thiserror::Error;

use crate::{
    asset::{AssetId, Lovelace, Value},
    hash::{DatumHash, KeyHash, ScriptHash},
    script::RedeemerPointer,
    utxo::UTxOIdentifier,
};

/// Value arithmetic failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Negative value for {asset}: {available} available, {required} required")]
    NegativeValue {
        asset: AssetId,
        available: u64,
        required: u64,
    },

    #[error("Quantity overflow for {asset}")]
    Overflow { asset: AssetId },
}

/// What a script is being run for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptPurpose {
    Spend(UTxOIdentifier),
    Mint(ScriptHash),
}

impl std::fmt::Display for ScriptPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptPurpose::Spend(input) => write!(f, "spending {input}"),
            ScriptPurpose::Mint(policy) => write!(f, "minting under {policy}"),
        }
    }
}

/// Transaction construction error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxBuildError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Value, available: Value },

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(
        "Transaction did not balance after {attempts} attempts (last fee {last_fee}, last change {last_change})"
    )]
    Unbalanceable {
        attempts: usize,
        last_fee: Lovelace,
        last_change: Value,
    },

    #[error("Missing script {script_hash} for {purpose}")]
    MissingScript {
        purpose: ScriptPurpose,
        script_hash: ScriptHash,
    },

    #[error("Missing redeemer for {purpose}")]
    MissingRedeemer { purpose: ScriptPurpose },

    #[error("Missing datum {datum_hash} for input {input}")]
    MissingDatum {
        input: UTxOIdentifier,
        datum_hash: DatumHash,
    },

    #[error("No lovelace-only UTxO of at least {required} available as collateral")]
    MissingCollateral { required: Lovelace },

    #[error("Script with a name {0} was not found")]
    ScriptNotFound(String),

    #[error(
        "Script {0} takes parameters; applying them to the compiled code is only supported on the emulator"
    )]
    ParametersNeedEmulator(String),

    #[error("Script {name} takes {expected} parameters, {given} given")]
    ParameterArity {
        name: String,
        expected: usize,
        given: usize,
    },
}

/// Reasons a ledger refuses a transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerValidationError {
    #[error("Input {0} does not exist or was already spent")]
    BadInput(UTxOIdentifier),

    #[error("Input {0} is listed more than once")]
    DuplicateInput(UTxOIdentifier),

    #[error("Transaction has no inputs")]
    NoInputs,

    #[error("Value not conserved: consumed {consumed}, produced {produced}")]
    ValueNotConserved { consumed: Value, produced: Value },

    #[error("Fee {fee} below minimum {min_fee}")]
    FeeTooSmall { fee: Lovelace, min_fee: Lovelace },

    #[error("Transaction size {size} exceeds maximum {max}")]
    MaxTxSizeExceeded { size: u64, max: u64 },

    #[error("Output {index} holds {lovelace} lovelace, minimum is {min}")]
    OutputTooSmall {
        index: usize,
        lovelace: Lovelace,
        min: Lovelace,
    },

    #[error("Missing signature from {0}")]
    MissingVKeyWitness(KeyHash),

    #[error("Invalid signature from {0}")]
    InvalidSignature(KeyHash),

    #[error("Missing script {0}")]
    MissingScript(ScriptHash),

    #[error("Missing redeemer {0}")]
    MissingRedeemer(RedeemerPointer),

    #[error("Missing datum {0}")]
    MissingDatum(DatumHash),

    #[error("Script data hash does not match redeemers and datums")]
    ScriptDataHashMismatch,

    #[error("Current slot {slot} outside validity interval")]
    OutsideValidityInterval { slot: u64 },

    #[error("Scripts present but no collateral provided")]
    NoCollateral,

    #[error("{count} collateral inputs, at most {max} allowed")]
    TooManyCollateralInputs { count: usize, max: u64 },

    #[error("Collateral input {0} holds native assets")]
    CollateralNotPureLovelace(UTxOIdentifier),

    #[error("Collateral {provided} below required {required}")]
    InsufficientCollateral { provided: Lovelace, required: Lovelace },

    #[error("Script {script_hash} failed: {reason}")]
    ScriptFailed {
        script_hash: ScriptHash,
        reason: String,
    },
}

/// Submission failure
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The ledger refused the transaction. Level tests treat this as a
    /// meaningful outcome, not a crash.
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<LedgerValidationError> for SubmitError {
    fn from(error: LedgerValidationError) -> Self {
        SubmitError::Rejected(error.to_string())
    }
}

impl SubmitError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, SubmitError::Rejected(_))
    }
}
