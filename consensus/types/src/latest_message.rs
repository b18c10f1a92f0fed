use crate::{Epoch, Hash256};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

/// The most recent attestation target observed for a validator.
///
/// Overwritten only by a message with a strictly greater epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct LatestMessage {
    pub epoch: Epoch,
    pub root: Hash256,
}
