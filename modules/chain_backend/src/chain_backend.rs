//! CTF chain backends
//! Query and submission interface with an in-memory emulator and a
//! Blockfrost implementation, plus the confirmation watcher

pub mod backend;
pub mod blockfrost;
pub mod confirmations;
pub mod emulator;
pub mod validations;

pub use backend::ChainBackend;
pub use blockfrost::Blockfrost;
pub use confirmations::{await_confirmations, Confirmation};
pub use emulator::{Emulator, ScriptContext, ScriptEvaluator, SLOTS_PER_BLOCK};
