use crate::consts::MaxValidatorsPerCommittee;
use crate::{AttestationData, SignatureBytes};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::BitList;
use tree_hash_derive::TreeHash;

/// An aggregate attestation as it appears on the wire and in block bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct Attestation {
    pub aggregation_bits: BitList<MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub custody_bits: BitList<MaxValidatorsPerCommittee>,
    pub signature: SignatureBytes,
}
