use state_processing::StateTransitionError;
use types::{BeaconStateError, Hash256};

/// Failures of the block-admission pipeline and its surroundings.
///
/// Only `BlockFailedProcessing` and `StateRootMismatch` poison a block; all
/// other errors leave the store untouched so the block may be retried.
#[derive(Debug)]
pub enum BeaconChainError {
    /// The block's parent is not stored; re-queue once the parent arrives.
    UnknownParent(Hash256),
    /// The pre-state for the block's parent could not be produced.
    StatePreload(store::Error),
    /// A block at the genesis slot may never be re-processed.
    GenesisReplay,
    /// The block's slot is ahead of the local wall clock.
    FromFuture { slot_time: u64, now: u64 },
    /// The eth1 block referenced by the state is unknown to the deposit
    /// watcher.
    UnknownEth1(Hash256),
    /// The state transition rejected the block. The block is poisoned.
    BlockFailedProcessing(StateTransitionError),
    /// The computed post-state root disagrees with the block. Poisoned.
    StateRootMismatch { expected: Hash256, found: Hash256 },
    /// Supervisory health check tripped.
    TooManyWorkers { live: usize, max: usize },
    /// The chain has not been initialized with a genesis state.
    NotInitialized,
    BeaconStateError(BeaconStateError),
    StoreError(store::Error),
}

impl From<store::Error> for BeaconChainError {
    fn from(e: store::Error) -> Self {
        BeaconChainError::StoreError(e)
    }
}

impl From<BeaconStateError> for BeaconChainError {
    fn from(e: BeaconStateError) -> Self {
        BeaconChainError::BeaconStateError(e)
    }
}
