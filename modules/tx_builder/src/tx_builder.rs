//! Transaction construction: drafts, UTxO selection, fee estimation,
//! balancing and script witness checks

mod balance;
mod draft;
mod fee;
mod selection;
mod witness;

pub use balance::{balance, BalanceContext, MAX_BALANCE_ATTEMPTS};
pub use draft::{OutputDatum, TransactionDraft};
pub use fee::estimate_fee;
pub use selection::{select, Selection};
pub use witness::check_script_witnesses;
