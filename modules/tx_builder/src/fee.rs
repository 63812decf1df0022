//! Linear fee estimation

use ctf_common::{protocol_params::ProtocolParams, Lovelace};

use crate::draft::TransactionDraft;

/// Estimate the minimum fee for the draft as it stands.
///
/// The size is that of the full transaction with the fee field at its widest
/// encoding and one vkey witness for every key that will have to sign.
pub fn estimate_fee(draft: &TransactionDraft, params: &ProtocolParams) -> Lovelace {
    let tx = draft.assemble_unchecked(Lovelace::MAX, params);
    let size = tx.size_with_signers(draft.signing_keys().len()) as u64;
    params.min_fee(size, tx.witnesses().ex_units())
}
