use crate::consts::MaxValidatorsPerCommittee;
use crate::{AttestationData, SignatureBytes};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::VariableList;
use tree_hash_derive::TreeHash;

/// An attestation with attester indices resolved against the committee
/// layout, split by custody bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct IndexedAttestation {
    pub custody_bit_0_indices: VariableList<u64, MaxValidatorsPerCommittee>,
    pub custody_bit_1_indices: VariableList<u64, MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: SignatureBytes,
}

impl IndexedAttestation {
    /// All attesting indices, both custody sets.
    pub fn attesting_indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.custody_bit_0_indices
            .iter()
            .chain(self.custody_bit_1_indices.iter())
            .copied()
    }

    /// `true` if the two attestations are slashable under the FFG rules:
    /// a double vote or a surround vote.
    pub fn is_slashable(&self, other: &IndexedAttestation) -> bool {
        let double = self.data != other.data && self.data.target.epoch == other.data.target.epoch;
        let surround = self.data.source.epoch < other.data.source.epoch
            && other.data.target.epoch < self.data.target.epoch;
        double || surround
    }
}
