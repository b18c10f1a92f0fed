//! The beacon state transition: genesis construction, per-slot and per-block
//! processing, and the epoch transition.

pub mod common;
pub mod genesis;
pub mod per_block_processing;
pub mod per_epoch_processing;
pub mod per_slot_processing;

pub use genesis::{
    genesis_block, genesis_deposits, initialize_beacon_state_from_eth1, is_valid_genesis_state,
    mix_in_count, process_activations, GenesisError,
};
pub use per_block_processing::errors::{AttestationInvalid, BlockInvalid, BlockProcessingError};
pub use per_block_processing::{
    is_valid_indexed_attestation, per_block_processing, process_deposit,
};
pub use per_epoch_processing::{per_epoch_processing, EpochProcessingError, EpochSummary};
pub use per_slot_processing::{per_slot_processing, SlotProcessingError};

use types::{BeaconBlock, BeaconState, ChainSpec, Slot};

/// Knobs for a single state-transition run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionConfig {
    /// Verify BLS signatures on blocks, attestations and operations.
    ///
    /// Replay of already-accepted blocks turns this off; everything else
    /// keeps the default.
    pub verify_signatures: bool,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            verify_signatures: true,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum StateTransitionError {
    /// The target slot is behind the state's slot.
    SlotsBackwards { state: Slot, target: Slot },
    SlotProcessingError(SlotProcessingError),
    BlockProcessingError(BlockProcessingError),
}

impl From<SlotProcessingError> for StateTransitionError {
    fn from(e: SlotProcessingError) -> Self {
        StateTransitionError::SlotProcessingError(e)
    }
}

impl From<BlockProcessingError> for StateTransitionError {
    fn from(e: BlockProcessingError) -> Self {
        StateTransitionError::BlockProcessingError(e)
    }
}

/// Advance `state` through empty slots up to and including `target`.
///
/// Returns a summary for every epoch boundary crossed.
pub fn process_slots(
    state: &mut BeaconState,
    target: Slot,
    spec: &ChainSpec,
) -> Result<Vec<EpochSummary>, StateTransitionError> {
    if target < state.slot {
        return Err(StateTransitionError::SlotsBackwards {
            state: state.slot,
            target,
        });
    }

    let mut summaries = vec![];
    while state.slot < target {
        if let Some(summary) = per_slot_processing(state, spec)? {
            summaries.push(summary);
        }
    }
    Ok(summaries)
}

/// The full state transition: empty slots up to the block's slot, then the
/// block itself.
///
/// The input state is untouched; a new state is returned along with the
/// summaries of any crossed epoch boundaries.
pub fn state_transition(
    pre_state: &BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(BeaconState, Vec<EpochSummary>), StateTransitionError> {
    let mut state = pre_state.clone();
    let summaries = process_slots(&mut state, block.slot, spec)?;
    per_block_processing(&mut state, block, config, spec)?;
    Ok((state, summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Epoch, Eth1Data, Hash256};

    fn genesis_state(validators: usize, spec: &ChainSpec) -> BeaconState {
        let data: Vec<types::DepositData> = (0..validators)
            .map(|i| {
                let mut pubkey = [0_u8; 48];
                pubkey[0..8].copy_from_slice(&(i as u64).to_le_bytes());
                types::DepositData {
                    pubkey: types::PublicKeyBytes::from_bytes(&pubkey).unwrap(),
                    withdrawal_credentials: Hash256::zero(),
                    amount: spec.max_effective_balance,
                    signature: types::SignatureBytes::empty(),
                }
            })
            .collect();
        let (deposits, root) = genesis_deposits(data, spec);
        let eth1_data = Eth1Data {
            deposit_root: root,
            deposit_count: deposits.len() as u64,
            block_hash: Hash256::zero(),
        };
        initialize_beacon_state_from_eth1(0, &deposits, eth1_data, spec).unwrap()
    }

    #[test]
    fn process_slots_rejects_backward_targets() {
        let spec = ChainSpec::minimal();
        let mut state = genesis_state(8, &spec);
        state.slot = Slot::new(5);
        assert!(matches!(
            process_slots(&mut state, Slot::new(4), &spec),
            Err(StateTransitionError::SlotsBackwards { .. })
        ));
    }

    #[test]
    fn empty_slot_advance_crosses_epoch_boundary() {
        let spec = ChainSpec::minimal();
        let mut state = genesis_state(16, &spec);
        let target = Slot::new(spec.slots_per_epoch + 2);

        let summaries = process_slots(&mut state, target, &spec).unwrap();
        assert_eq!(state.slot, target);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].epoch, Epoch::new(0));
    }

    #[test]
    fn block_roots_accumulate_during_advance() {
        let spec = ChainSpec::minimal();
        let mut state = genesis_state(8, &spec);
        process_slots(&mut state, Slot::new(3), &spec).unwrap();

        // Every past slot points at the genesis block header.
        let genesis_root = state.latest_block_header.canonical_root();
        for slot in 0..3 {
            assert_eq!(
                state.get_block_root(Slot::new(slot), &spec).unwrap(),
                genesis_root
            );
        }
    }

    #[test]
    fn genesis_block_transition_applies() {
        let spec = ChainSpec::minimal();
        let state = genesis_state(16, &spec);
        // The stored genesis block carries the genesis state root, which is
        // also what the first cache pass folds into the latest header.
        let genesis_root = genesis_block(state.canonical_root(), &spec).canonical_root();

        // A block is invalid unless it extends the latest header.
        let mut block = BeaconBlock::empty(Slot::new(1));
        block.parent_root = Hash256::repeat_byte(0xde);
        let config = TransitionConfig {
            verify_signatures: false,
        };
        assert!(state_transition(&state, &block, &config, &spec).is_err());

        let mut block = BeaconBlock::empty(Slot::new(1));
        block.parent_root = genesis_root;
        let (post, _) = state_transition(&state, &block, &config, &spec).unwrap();
        assert_eq!(post.slot, Slot::new(1));
    }
}
