use crate::{BeaconBlockBody, BeaconBlockHeader, Hash256, SignatureBytes, Slot};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// A block in the beacon chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct BeaconBlock {
    pub slot: Slot,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub body: BeaconBlockBody,
    pub signature: SignatureBytes,
}

impl BeaconBlock {
    /// An empty block at `slot` with zeroed roots.
    pub fn empty(slot: Slot) -> Self {
        Self {
            slot,
            parent_root: Hash256::zero(),
            state_root: Hash256::zero(),
            body: BeaconBlockBody::default(),
            signature: SignatureBytes::empty(),
        }
    }

    /// The header form of this block, with the body reduced to its root.
    pub fn block_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.tree_hash_root(),
        }
    }

    /// The header with a zeroed state root, as stored in the state before the
    /// post-state is known.
    pub fn temporary_block_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            state_root: Hash256::zero(),
            ..self.block_header()
        }
    }

    /// The signing root of this block: its identity everywhere in the store
    /// and the fork-choice DAG.
    pub fn canonical_root(&self) -> Hash256 {
        self.block_header().canonical_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_root_ignores_signature() {
        let mut a = BeaconBlock::empty(Slot::new(4));
        let b = a.clone();
        a.signature = SignatureBytes::from_bytes(&[7; 96]).unwrap();
        assert_eq!(a.canonical_root(), b.canonical_root());
    }

    #[test]
    fn canonical_root_tracks_signed_fields() {
        let a = BeaconBlock::empty(Slot::new(4));
        let mut b = BeaconBlock::empty(Slot::new(4));
        b.parent_root = Hash256::repeat_byte(1);
        assert_ne!(a.canonical_root(), b.canonical_root());
    }
}
