use crate::{Hash256, PublicKeyBytes, SignatureBytes};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::typenum::U33;
use ssz_types::FixedVector;
use tree_hash_derive::TreeHash;

/// The data submitted to the eth1 deposit contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct DepositData {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: Hash256,
    pub amount: u64,
    pub signature: SignatureBytes,
}

/// A deposit with its merkle proof against the deposit-contract root.
///
/// The proof has `deposit_contract_tree_depth + 1` elements; the final
/// element mixes in the leaf count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct Deposit {
    pub proof: FixedVector<Hash256, U33>,
    pub data: DepositData,
}
