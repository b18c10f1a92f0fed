use crate::{BeaconBlockHeader, SignatureBytes};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

/// A block header signed by a proposer, evidence in a proposer slashing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct SignedBeaconBlockHeader {
    pub header: BeaconBlockHeader,
    pub signature: SignatureBytes,
}

/// Two conflicting block headers signed by one proposer in the same slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct ProposerSlashing {
    pub proposer_index: u64,
    pub header_1: SignedBeaconBlockHeader,
    pub header_2: SignedBeaconBlockHeader,
}
