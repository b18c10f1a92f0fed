//! Committee layout over the active validator set.

use crate::common::shuffle::compute_shuffled_index;
use ethereum_hashing::hash;
use ssz_types::BitList;
use types::consts::MaxValidatorsPerCommittee;
use types::{
    Attestation, AttestationData, BeaconState, BeaconStateError, ChainSpec, CommitteeIndex, Epoch,
    Hash256, IndexedAttestation, Slot,
};

#[derive(Debug, PartialEq, Clone)]
pub enum CommitteeError {
    BeaconStateError(BeaconStateError),
    NoActiveValidators,
    InvalidCommitteeIndex(CommitteeIndex),
    ShuffleFailure,
    /// An aggregation or custody bitfield does not match the committee size.
    BitfieldLengthMismatch { bitfield: usize, committee: usize },
    NoProposerFound,
}

impl From<BeaconStateError> for CommitteeError {
    fn from(e: BeaconStateError) -> Self {
        CommitteeError::BeaconStateError(e)
    }
}

/// Indices of all validators active in `epoch`, ascending.
pub fn active_validator_indices(state: &BeaconState, epoch: Epoch) -> Vec<u64> {
    state
        .validators
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_active_at(epoch))
        .map(|(i, _)| i as u64)
        .collect()
}

/// Number of committees serving each slot of an epoch with `active_count`
/// active validators.
pub fn committees_per_slot(active_count: usize, spec: &ChainSpec) -> u64 {
    std::cmp::max(
        1,
        std::cmp::min(
            spec.max_committees_per_slot,
            active_count as u64 / spec.slots_per_epoch / spec.target_committee_size,
        ),
    )
}

/// Total number of committees over one epoch.
pub fn committee_count_at_epoch(state: &BeaconState, epoch: Epoch, spec: &ChainSpec) -> u64 {
    committees_per_slot(active_validator_indices(state, epoch).len(), spec) * spec.slots_per_epoch
}

/// The `index`-th slice of the shuffled active set for the epoch, selected by
/// `(slot, committee_index)`.
pub fn beacon_committee(
    state: &BeaconState,
    slot: Slot,
    index: CommitteeIndex,
    spec: &ChainSpec,
) -> Result<Vec<u64>, CommitteeError> {
    let epoch = slot.epoch(spec.slots_per_epoch);
    let active = active_validator_indices(state, epoch);
    if active.is_empty() {
        return Err(CommitteeError::NoActiveValidators);
    }

    let per_slot = committees_per_slot(active.len(), spec);
    if index >= per_slot {
        return Err(CommitteeError::InvalidCommitteeIndex(index));
    }

    let count = per_slot * spec.slots_per_epoch;
    let position = (slot.as_u64() % spec.slots_per_epoch) * per_slot + index;
    let seed = state.get_seed(epoch, spec)?;

    compute_committee(&active, &seed, position as usize, count as usize, spec)
}

/// Slice `index` of `count` committees over the shuffled `indices`.
fn compute_committee(
    indices: &[u64],
    seed: &Hash256,
    index: usize,
    count: usize,
    spec: &ChainSpec,
) -> Result<Vec<u64>, CommitteeError> {
    let start = indices.len() * index / count;
    let end = indices.len() * (index + 1) / count;

    (start..end)
        .map(|i| {
            compute_shuffled_index(i, indices.len(), seed, spec.shuffle_round_count)
                .map(|shuffled| indices[shuffled])
                .ok_or(CommitteeError::ShuffleFailure)
        })
        .collect()
}

/// The proposer for the state's current slot, sampled proportionally to
/// effective balance.
pub fn beacon_proposer_index(state: &BeaconState, spec: &ChainSpec) -> Result<u64, CommitteeError> {
    let epoch = state.current_epoch(spec);
    let indices = active_validator_indices(state, epoch);
    if indices.is_empty() {
        return Err(CommitteeError::NoActiveValidators);
    }

    let mut preimage = Vec::with_capacity(40);
    preimage.extend_from_slice(state.get_seed(epoch, spec)?.as_bytes());
    preimage.extend_from_slice(&state.slot.as_u64().to_le_bytes());
    let seed = Hash256::from_slice(&hash(&preimage));

    // Sample candidates in shuffled order, accepting with probability
    // proportional to effective balance.
    let mut i = 0_usize;
    loop {
        if i >= indices.len() * 32 {
            return Err(CommitteeError::NoProposerFound);
        }
        let shuffled = compute_shuffled_index(
            i % indices.len(),
            indices.len(),
            &seed,
            spec.shuffle_round_count,
        )
        .ok_or(CommitteeError::ShuffleFailure)?;
        let candidate = indices[shuffled];

        let mut preimage = Vec::with_capacity(40);
        preimage.extend_from_slice(seed.as_bytes());
        preimage.extend_from_slice(&(i as u64 / 32).to_le_bytes());
        let random_byte = hash(&preimage)[i % 32];

        let effective = state
            .validators
            .get(candidate as usize)
            .ok_or(BeaconStateError::UnknownValidator(candidate))?
            .effective_balance;
        if effective * u64::from(u8::max_value()) >= spec.max_effective_balance * u64::from(random_byte)
        {
            return Ok(candidate);
        }
        i += 1;
    }
}

/// The slot an attestation is for, validated against the committee layout of
/// the state covering its target epoch.
pub fn attestation_data_slot(
    state: &BeaconState,
    data: &AttestationData,
    spec: &ChainSpec,
) -> Result<Slot, CommitteeError> {
    let epoch = data.slot.epoch(spec.slots_per_epoch);
    let per_slot = committees_per_slot(active_validator_indices(state, epoch).len(), spec);
    if data.committee_index >= per_slot {
        return Err(CommitteeError::InvalidCommitteeIndex(data.committee_index));
    }
    Ok(data.slot)
}

/// The committee members voting in `attestation`, ascending, deduplicated by
/// construction.
pub fn get_attesting_indices(
    state: &BeaconState,
    data: &AttestationData,
    aggregation_bits: &BitList<MaxValidatorsPerCommittee>,
    spec: &ChainSpec,
) -> Result<Vec<u64>, CommitteeError> {
    let committee = beacon_committee(state, data.slot, data.committee_index, spec)?;
    if aggregation_bits.len() != committee.len() {
        return Err(CommitteeError::BitfieldLengthMismatch {
            bitfield: aggregation_bits.len(),
            committee: committee.len(),
        });
    }

    let mut indices: Vec<u64> = committee
        .iter()
        .enumerate()
        .filter(|(i, _)| aggregation_bits.get(*i).unwrap_or(false))
        .map(|(_, validator)| *validator)
        .collect();
    indices.sort_unstable();
    Ok(indices)
}

/// Resolve an attestation against the committee layout, splitting attesters
/// by custody bit.
pub fn get_indexed_attestation(
    state: &BeaconState,
    attestation: &Attestation,
    spec: &ChainSpec,
) -> Result<IndexedAttestation, CommitteeError> {
    let committee = beacon_committee(state, attestation.data.slot, attestation.data.committee_index, spec)?;
    if attestation.aggregation_bits.len() != committee.len()
        || attestation.custody_bits.len() != committee.len()
    {
        return Err(CommitteeError::BitfieldLengthMismatch {
            bitfield: attestation.aggregation_bits.len(),
            committee: committee.len(),
        });
    }

    let mut bit_0 = vec![];
    let mut bit_1 = vec![];
    for (i, validator) in committee.iter().enumerate() {
        if attestation.aggregation_bits.get(i).unwrap_or(false) {
            if attestation.custody_bits.get(i).unwrap_or(false) {
                bit_1.push(*validator);
            } else {
                bit_0.push(*validator);
            }
        }
    }
    bit_0.sort_unstable();
    bit_1.sort_unstable();

    Ok(IndexedAttestation {
        custody_bit_0_indices: bit_0.into(),
        custody_bit_1_indices: bit_1.into(),
        data: attestation.data.clone(),
        signature: attestation.signature,
    })
}
