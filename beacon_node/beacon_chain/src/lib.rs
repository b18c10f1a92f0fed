//! The beacon-chain service: block admission, chain-start bootstrap, and
//! the feeds and seams connecting the consensus core to its collaborators.

mod attestation_handler;
mod beacon_chain;
mod caches;
mod errors;
mod eth1_chain;
pub mod events;
pub mod metrics;
mod queries;
pub mod test_utils;

pub use crate::beacon_chain::{
    BeaconChain, BeaconChainConfig, ChainConfig, WorkerGuard, WorkerRegistry,
};
pub use attestation_handler::{AttestationTargetHandler, AttestationTargetService};
pub use caches::HelperCaches;
pub use errors::BeaconChainError;
pub use eth1_chain::{Eth1ChainBackend, TestingEth1Backend};
pub use events::{Feed, Subscription};
pub use queries::{
    ActiveSetChanges, ChainHead, ListFilter, ValidatorAssignment, ValidatorBalance, ValidatorPage,
    ValidatorParticipation, ValidatorQueue,
};

use store::{Context, ItemStore};
use types::{Attestation, BeaconBlock, Hash256, Slot};

/// Announcement of a freshly stored block, published to peers.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconBlockAnnounce {
    pub hash: Hash256,
    pub slot_number: Slot,
}

/// Outbound gossip seam to the peer-to-peer layer.
pub trait Broadcaster: Send + Sync + 'static {
    fn broadcast(&self, ctx: &Context, announce: BeaconBlockAnnounce);
}

/// The operation pool's view of the chain: processed blocks flow in, pooled
/// attestations can be inspected.
pub trait OperationFeeds: Send + Sync + 'static {
    fn incoming_processed_block_feed(&self) -> &Feed<BeaconBlock>;

    fn pool_attestations(&self) -> Vec<Attestation>;
}

/// The set of concrete collaborator types behind one `BeaconChain`.
pub trait BeaconChainTypes: Send + Sync + Sized + 'static {
    type Store: ItemStore;
    type Eth1Chain: Eth1ChainBackend;
    type Broadcaster: Broadcaster;
    type TargetHandler: AttestationTargetHandler;
    type OpPool: OperationFeeds;
}
