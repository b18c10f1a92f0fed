use crate::{Hash256, Slot};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// The signed fields of a beacon block, with the body reduced to its root.
///
/// The tree-hash root of this container is the block's signing root and
/// therefore its identity.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct BeaconBlockHeader {
    pub slot: Slot,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub body_root: Hash256,
}

impl BeaconBlockHeader {
    /// The signing root of the block this header summarises.
    pub fn canonical_root(&self) -> Hash256 {
        self.tree_hash_root()
    }
}
