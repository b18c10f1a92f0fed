//! Advances a state forward by one slot, performing per-epoch processing if
//! required.

use crate::per_epoch_processing::{per_epoch_processing, EpochProcessingError, EpochSummary};
use types::{BeaconState, BeaconStateError, ChainSpec, Hash256};

#[derive(Debug, PartialEq, Clone)]
pub enum SlotProcessingError {
    BeaconStateError(BeaconStateError),
    EpochProcessingError(EpochProcessingError),
}

impl From<BeaconStateError> for SlotProcessingError {
    fn from(e: BeaconStateError) -> Self {
        SlotProcessingError::BeaconStateError(e)
    }
}

impl From<EpochProcessingError> for SlotProcessingError {
    fn from(e: EpochProcessingError) -> Self {
        SlotProcessingError::EpochProcessingError(e)
    }
}

/// Advance `state` by one slot.
///
/// Returns the epoch summary when the step crossed an epoch boundary.
pub fn per_slot_processing(
    state: &mut BeaconState,
    spec: &ChainSpec,
) -> Result<Option<EpochSummary>, SlotProcessingError> {
    cache_state(state, spec)?;

    let summary = if state.slot > spec.genesis_slot
        && (state.slot + 1).as_u64() % spec.slots_per_epoch == 0
    {
        Some(per_epoch_processing(state, spec)?)
    } else {
        None
    };

    state.slot += 1;
    Ok(summary)
}

/// Fold the previous slot's state root and block root into the history
/// rings.
fn cache_state(state: &mut BeaconState, spec: &ChainSpec) -> Result<(), SlotProcessingError> {
    let previous_state_root = state.canonical_root();
    let previous_slot = state.slot;

    // The state root must be known before the ring can reference it, so the
    // slot is bumped for the duration of the writes.
    state.slot += 1;
    state.set_state_root(previous_slot, previous_state_root, spec)?;

    if state.latest_block_header.state_root == Hash256::zero() {
        state.latest_block_header.state_root = previous_state_root;
    }
    let latest_block_root = state.latest_block_header.canonical_root();
    state.set_block_root(previous_slot, latest_block_root, spec)?;

    state.slot -= 1;
    Ok(())
}
