use crate::consts::{
    Eth1DataVotesBound, EpochsPerHistoricalVectorBound, EpochsPerSlashingsVectorBound,
    JustificationBitsLength, PendingAttestationsBound, SlotsPerHistoricalRootBound,
    ValidatorRegistryLimit,
};
use crate::{
    BeaconBlockHeader, ChainSpec, Checkpoint, Epoch, Eth1Data, Fork, Hash256, PendingAttestation,
    PublicKeyBytes, Slot, Validator,
};
use ethereum_hashing::hash;
use safe_arith::ArithError;
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitVector, VariableList};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

#[derive(Debug, PartialEq, Clone)]
pub enum BeaconStateError {
    /// A slot outside the readable window of a historical ring.
    SlotOutOfBounds,
    EpochOutOfBounds,
    UnknownValidator(u64),
    InsufficientValidators,
    /// A runtime ring length exceeded its type-level bound.
    RingLengthExceedsBound,
    ArithError(ArithError),
}

impl From<ArithError> for BeaconStateError {
    fn from(e: ArithError) -> Self {
        BeaconStateError::ArithError(e)
    }
}

/// The replicated state of the beacon chain.
///
/// States are immutable once committed to the store; the state transition
/// takes a copy and returns a new value. Identity is the tree-hash root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct BeaconState {
    // Versioning
    pub genesis_time: u64,
    pub slot: Slot,
    pub fork: Fork,

    // History
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: VariableList<Hash256, SlotsPerHistoricalRootBound>,
    pub state_roots: VariableList<Hash256, SlotsPerHistoricalRootBound>,

    // Eth1
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: VariableList<Eth1Data, Eth1DataVotesBound>,
    pub eth1_deposit_index: u64,

    // Registry
    pub validators: VariableList<Validator, ValidatorRegistryLimit>,
    pub balances: VariableList<u64, ValidatorRegistryLimit>,

    // Randomness
    pub randao_mixes: VariableList<Hash256, EpochsPerHistoricalVectorBound>,

    // Slashings
    pub slashings: VariableList<u64, EpochsPerSlashingsVectorBound>,

    // Attestations
    pub previous_epoch_attestations: VariableList<PendingAttestation, PendingAttestationsBound>,
    pub current_epoch_attestations: VariableList<PendingAttestation, PendingAttestationsBound>,

    // Finality
    pub justification_bits: BitVector<JustificationBitsLength>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

impl BeaconState {
    /// A state at the genesis slot with empty registry and zeroed history
    /// rings sized from `spec`.
    pub fn new(
        genesis_time: u64,
        eth1_data: Eth1Data,
        spec: &ChainSpec,
    ) -> Result<Self, BeaconStateError> {
        fn zero_ring<N: ssz_types::typenum::Unsigned>(
            len: usize,
        ) -> Result<VariableList<Hash256, N>, BeaconStateError> {
            VariableList::new(vec![Hash256::zero(); len])
                .map_err(|_| BeaconStateError::RingLengthExceedsBound)
        }

        Ok(Self {
            genesis_time,
            slot: spec.genesis_slot,
            fork: Fork::default(),

            latest_block_header: BeaconBlockHeader::default(),
            block_roots: zero_ring(spec.slots_per_historical_root)?,
            state_roots: zero_ring(spec.slots_per_historical_root)?,

            eth1_data,
            eth1_data_votes: VariableList::empty(),
            eth1_deposit_index: 0,

            validators: VariableList::empty(),
            balances: VariableList::empty(),

            randao_mixes: zero_ring(spec.epochs_per_historical_vector)?,

            slashings: VariableList::new(vec![0; spec.epochs_per_slashings_vector])
                .map_err(|_| BeaconStateError::RingLengthExceedsBound)?,

            previous_epoch_attestations: VariableList::empty(),
            current_epoch_attestations: VariableList::empty(),

            justification_bits: BitVector::new(),
            previous_justified_checkpoint: Checkpoint::default(),
            current_justified_checkpoint: Checkpoint::default(),
            finalized_checkpoint: Checkpoint::default(),
        })
    }

    /// The epoch of the state's slot.
    pub fn current_epoch(&self, spec: &ChainSpec) -> Epoch {
        self.slot.epoch(spec.slots_per_epoch)
    }

    /// The epoch preceding the current one, clamped at genesis.
    pub fn previous_epoch(&self, spec: &ChainSpec) -> Epoch {
        let current = self.current_epoch(spec);
        if current > spec.genesis_epoch {
            current - 1
        } else {
            current
        }
    }

    pub fn next_epoch(&self, spec: &ChainSpec) -> Epoch {
        self.current_epoch(spec) + 1
    }

    /// The block root for `slot`, readable while `slot` is within the
    /// historical-root window ending at the state's slot.
    pub fn get_block_root(&self, slot: Slot, spec: &ChainSpec) -> Result<Hash256, BeaconStateError> {
        let window = spec.slots_per_historical_root as u64;
        if slot < self.slot && self.slot <= slot + window {
            Ok(self.block_roots[slot.as_usize() % spec.slots_per_historical_root])
        } else {
            Err(BeaconStateError::SlotOutOfBounds)
        }
    }

    /// The block root at the first slot of `epoch`.
    pub fn get_block_root_at_epoch(
        &self,
        epoch: Epoch,
        spec: &ChainSpec,
    ) -> Result<Hash256, BeaconStateError> {
        self.get_block_root(epoch.start_slot(spec.slots_per_epoch), spec)
    }

    pub fn set_block_root(
        &mut self,
        slot: Slot,
        root: Hash256,
        spec: &ChainSpec,
    ) -> Result<(), BeaconStateError> {
        let i = slot.as_usize() % spec.slots_per_historical_root;
        *self
            .block_roots
            .get_mut(i)
            .ok_or(BeaconStateError::SlotOutOfBounds)? = root;
        Ok(())
    }

    pub fn get_state_root(&self, slot: Slot, spec: &ChainSpec) -> Result<Hash256, BeaconStateError> {
        let window = spec.slots_per_historical_root as u64;
        if slot < self.slot && self.slot <= slot + window {
            Ok(self.state_roots[slot.as_usize() % spec.slots_per_historical_root])
        } else {
            Err(BeaconStateError::SlotOutOfBounds)
        }
    }

    pub fn set_state_root(
        &mut self,
        slot: Slot,
        root: Hash256,
        spec: &ChainSpec,
    ) -> Result<(), BeaconStateError> {
        let i = slot.as_usize() % spec.slots_per_historical_root;
        *self
            .state_roots
            .get_mut(i)
            .ok_or(BeaconStateError::SlotOutOfBounds)? = root;
        Ok(())
    }

    /// The RANDAO mix recorded for `epoch`.
    pub fn get_randao_mix(&self, epoch: Epoch, spec: &ChainSpec) -> Result<Hash256, BeaconStateError> {
        self.randao_mixes
            .get(epoch.as_usize() % spec.epochs_per_historical_vector)
            .copied()
            .ok_or(BeaconStateError::EpochOutOfBounds)
    }

    pub fn set_randao_mix(
        &mut self,
        epoch: Epoch,
        mix: Hash256,
        spec: &ChainSpec,
    ) -> Result<(), BeaconStateError> {
        let i = epoch.as_usize() % spec.epochs_per_historical_vector;
        *self
            .randao_mixes
            .get_mut(i)
            .ok_or(BeaconStateError::EpochOutOfBounds)? = mix;
        Ok(())
    }

    /// The shuffling seed for `epoch`: the lookahead-shifted RANDAO mix
    /// hashed with the epoch.
    pub fn get_seed(&self, epoch: Epoch, spec: &ChainSpec) -> Result<Hash256, BeaconStateError> {
        let mix_epoch = epoch
            + spec.epochs_per_historical_vector as u64
            - spec.min_seed_lookahead.as_u64()
            - 1;
        let mix = self.get_randao_mix(mix_epoch, spec)?;

        let mut preimage = Vec::with_capacity(40);
        preimage.extend_from_slice(mix.as_bytes());
        preimage.extend_from_slice(&epoch.as_u64().to_le_bytes());
        Ok(Hash256::from_slice(&hash(&preimage)))
    }

    /// Linear scan of the registry for `pubkey`.
    ///
    /// Hot paths use the store's pubkey index instead.
    pub fn get_validator_index(&self, pubkey: &PublicKeyBytes) -> Option<u64> {
        self.validators
            .iter()
            .position(|v| v.pubkey == *pubkey)
            .map(|i| i as u64)
    }

    /// The tree-hash root of the state: its identity.
    pub fn canonical_root(&self) -> Hash256 {
        self.tree_hash_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_state() -> BeaconState {
        BeaconState::new(0, Eth1Data::default(), &ChainSpec::minimal()).unwrap()
    }

    #[test]
    fn previous_epoch_clamps_at_genesis() {
        let spec = ChainSpec::minimal();
        let mut state = new_state();
        assert_eq!(state.previous_epoch(&spec), Epoch::new(0));
        state.slot = Slot::new(spec.slots_per_epoch * 3);
        assert_eq!(state.previous_epoch(&spec), Epoch::new(2));
    }

    #[test]
    fn block_root_window() {
        let spec = ChainSpec::minimal();
        let mut state = new_state();
        state.slot = Slot::new(5);
        state.set_block_root(Slot::new(4), Hash256::repeat_byte(4), &spec).unwrap();

        assert_eq!(
            state.get_block_root(Slot::new(4), &spec).unwrap(),
            Hash256::repeat_byte(4)
        );
        // The state's own slot is not yet readable.
        assert!(state.get_block_root(Slot::new(5), &spec).is_err());
    }

    #[test]
    fn randao_mix_wraps_by_epoch() {
        let spec = ChainSpec::minimal();
        let mut state = new_state();
        state
            .set_randao_mix(Epoch::new(1), Hash256::repeat_byte(9), &spec)
            .unwrap();
        assert_eq!(
            state.get_randao_mix(Epoch::new(1), &spec).unwrap(),
            Hash256::repeat_byte(9)
        );
    }

    #[test]
    fn canonical_root_changes_with_slot() {
        let mut state = new_state();
        let before = state.canonical_root();
        state.slot = Slot::new(1);
        assert_ne!(before, state.canonical_root());
    }
}
