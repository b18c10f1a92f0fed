use crate::{Hash256, Slot};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

/// A lightweight per-block record supporting descendant lookups without
/// loading the full block.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct AttestationTarget {
    pub slot: Slot,
    pub beacon_block_root: Hash256,
    pub parent_root: Hash256,
}
