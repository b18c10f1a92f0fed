//! End-of-epoch processing: justification, finalization, rewards, registry
//! churn, slashings and ring rotation.

use crate::common::{
    activation_exit_epoch, decrease_balance, get_attesting_indices, get_base_reward,
    get_churn_limit, get_total_active_balance, get_total_balance, increase_balance,
    initiate_validator_exit, CommitteeError,
};
use safe_arith::SafeArith;
use types::{
    BeaconState, BeaconStateError, ChainSpec, Checkpoint, Epoch, PendingAttestation, Validator,
};

#[derive(Debug, PartialEq, Clone)]
pub enum EpochProcessingError {
    BeaconStateError(BeaconStateError),
    CommitteeError(CommitteeError),
}

impl From<BeaconStateError> for EpochProcessingError {
    fn from(e: BeaconStateError) -> Self {
        EpochProcessingError::BeaconStateError(e)
    }
}

impl From<CommitteeError> for EpochProcessingError {
    fn from(e: CommitteeError) -> Self {
        EpochProcessingError::CommitteeError(e)
    }
}

/// Registry movement produced by one epoch transition.
///
/// Consumed by the block pipeline to maintain the pubkey-to-index namespace;
/// replaces the original module-level activation/exit maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochSummary {
    /// The epoch that was just processed.
    pub epoch: Epoch,
    /// Validators whose activation epoch was assigned this transition.
    pub activated: Vec<u64>,
    /// Validators whose exit takes effect at the next epoch.
    pub exited: Vec<u64>,
    /// Validators force-exited for falling below the ejection balance.
    pub ejected: Vec<u64>,
    /// Gwei attesting to the previous epoch's target.
    pub target_attesting_gwei: u64,
    /// Gwei eligible to attest in the previous epoch.
    pub eligible_gwei: u64,
}

/// Run the full epoch transition for the epoch ending at the state's slot.
pub fn per_epoch_processing(
    state: &mut BeaconState,
    spec: &ChainSpec,
) -> Result<EpochSummary, EpochProcessingError> {
    let mut summary = EpochSummary {
        epoch: state.current_epoch(spec),
        ..EpochSummary::default()
    };

    process_justification_and_finalization(state, spec)?;
    record_participation(state, &mut summary, spec)?;
    process_rewards_and_penalties(state, spec)?;
    process_registry_updates(state, &mut summary, spec)?;
    process_slashings(state, spec)?;
    process_final_updates(state, spec)?;

    Ok(summary)
}

/// Attestations folded into the state for `epoch` (previous or current).
fn matching_source_attestations<'a>(
    state: &'a BeaconState,
    epoch: Epoch,
    spec: &ChainSpec,
) -> Result<&'a [PendingAttestation], EpochProcessingError> {
    if epoch == state.current_epoch(spec) {
        Ok(&state.current_epoch_attestations)
    } else if epoch == state.previous_epoch(spec) {
        Ok(&state.previous_epoch_attestations)
    } else {
        Err(BeaconStateError::EpochOutOfBounds.into())
    }
}

fn matching_target_attestations(
    state: &BeaconState,
    epoch: Epoch,
    spec: &ChainSpec,
) -> Result<Vec<PendingAttestation>, EpochProcessingError> {
    let target_root = state.get_block_root_at_epoch(epoch, spec)?;
    Ok(matching_source_attestations(state, epoch, spec)?
        .iter()
        .filter(|a| a.data.target.root == target_root)
        .cloned()
        .collect())
}

/// Distinct unslashed validators attesting in `attestations`, ascending.
fn unslashed_attesting_indices(
    state: &BeaconState,
    attestations: &[PendingAttestation],
    spec: &ChainSpec,
) -> Result<Vec<u64>, EpochProcessingError> {
    let mut indices = vec![];
    for attestation in attestations {
        indices.extend(get_attesting_indices(
            state,
            &attestation.data,
            &attestation.aggregation_bits,
            spec,
        )?);
    }
    indices.sort_unstable();
    indices.dedup();
    indices.retain(|i| {
        state
            .validators
            .get(*i as usize)
            .map_or(false, |v| !v.slashed)
    });
    Ok(indices)
}

fn attesting_balance(
    state: &BeaconState,
    attestations: &[PendingAttestation],
    spec: &ChainSpec,
) -> Result<u64, EpochProcessingError> {
    let indices = unslashed_attesting_indices(state, attestations, spec)?;
    Ok(get_total_balance(state, &indices, spec)?)
}

/// The two-round FFG justification vote and the four finalization rules.
pub fn process_justification_and_finalization(
    state: &mut BeaconState,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let current_epoch = state.current_epoch(spec);
    if current_epoch <= spec.genesis_epoch + 1 {
        return Ok(());
    }
    let previous_epoch = state.previous_epoch(spec);

    let old_previous_justified = state.previous_justified_checkpoint;
    let old_current_justified = state.current_justified_checkpoint;

    // Rotate: the newest vote occupies bit 0.
    state.previous_justified_checkpoint = state.current_justified_checkpoint;
    let mut bits = [false; 4];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = state.justification_bits.get(i).unwrap_or(false);
    }
    bits.rotate_right(1);
    bits[0] = false;

    let total_balance = get_total_active_balance(state, current_epoch, spec)?;
    let previous_target_balance =
        attesting_balance(state, &matching_target_attestations(state, previous_epoch, spec)?, spec)?;
    if previous_target_balance * 3 >= total_balance * 2 {
        state.current_justified_checkpoint = Checkpoint {
            epoch: previous_epoch,
            root: state.get_block_root_at_epoch(previous_epoch, spec)?,
        };
        bits[1] = true;
    }
    let current_target_balance =
        attesting_balance(state, &matching_target_attestations(state, current_epoch, spec)?, spec)?;
    if current_target_balance * 3 >= total_balance * 2 {
        state.current_justified_checkpoint = Checkpoint {
            epoch: current_epoch,
            root: state.get_block_root_at_epoch(current_epoch, spec)?,
        };
        bits[0] = true;
    }

    for (i, bit) in bits.iter().enumerate() {
        state
            .justification_bits
            .set(i, *bit)
            .map_err(|_| BeaconStateError::EpochOutOfBounds)?;
    }

    // The 2nd/3rd/4th most recent epochs are justified, the 4th was the
    // previous-justified checkpoint.
    if bits[1] && bits[2] && bits[3] && old_previous_justified.epoch + 3 == current_epoch {
        state.finalized_checkpoint = old_previous_justified;
    }
    // The 2nd/3rd most recent epochs are justified, the 3rd was the
    // previous-justified checkpoint.
    if bits[1] && bits[2] && old_previous_justified.epoch + 2 == current_epoch {
        state.finalized_checkpoint = old_previous_justified;
    }
    // The 1st/2nd/3rd most recent epochs are justified, the 3rd was the
    // current-justified checkpoint.
    if bits[0] && bits[1] && bits[2] && old_current_justified.epoch + 2 == current_epoch {
        state.finalized_checkpoint = old_current_justified;
    }
    // The 1st/2nd most recent epochs are justified, the 2nd was the
    // current-justified checkpoint.
    if bits[0] && bits[1] && old_current_justified.epoch + 1 == current_epoch {
        state.finalized_checkpoint = old_current_justified;
    }

    Ok(())
}

fn record_participation(
    state: &BeaconState,
    summary: &mut EpochSummary,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let current_epoch = state.current_epoch(spec);
    if current_epoch == spec.genesis_epoch {
        return Ok(());
    }
    let previous_epoch = state.previous_epoch(spec);
    summary.target_attesting_gwei = attesting_balance(
        state,
        &matching_target_attestations(state, previous_epoch, spec)?,
        spec,
    )?;
    summary.eligible_gwei = get_total_active_balance(state, previous_epoch, spec)?;
    Ok(())
}

/// Attestation rewards and penalties for the previous epoch, including the
/// inactivity leak.
pub fn process_rewards_and_penalties(
    state: &mut BeaconState,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let current_epoch = state.current_epoch(spec);
    if current_epoch == spec.genesis_epoch {
        return Ok(());
    }
    let previous_epoch = state.previous_epoch(spec);
    let total_balance = get_total_active_balance(state, current_epoch, spec)?;

    let source_attestations =
        matching_source_attestations(state, previous_epoch, spec)?.to_vec();
    let source_indices = unslashed_attesting_indices(state, &source_attestations, spec)?;
    let target_attestations = matching_target_attestations(state, previous_epoch, spec)?;
    let target_indices = unslashed_attesting_indices(state, &target_attestations, spec)?;
    let head_attestations: Vec<PendingAttestation> = source_attestations
        .iter()
        .filter(|a| {
            state
                .get_block_root(a.data.slot, spec)
                .map_or(false, |root| root == a.data.beacon_block_root)
        })
        .cloned()
        .collect();
    let head_indices = unslashed_attesting_indices(state, &head_attestations, spec)?;

    let source_balance = get_total_balance(state, &source_indices, spec)?;
    let target_balance = get_total_balance(state, &target_indices, spec)?;
    let head_balance = get_total_balance(state, &head_indices, spec)?;

    let eligible: Vec<u64> = state
        .validators
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            v.is_active_at(previous_epoch)
                || (v.slashed && previous_epoch + 1 < v.withdrawable_epoch)
        })
        .map(|(i, _)| i as u64)
        .collect();

    let mut rewards = vec![0_u64; state.validators.len()];
    let mut penalties = vec![0_u64; state.validators.len()];

    for &index in &eligible {
        let base = get_base_reward(state, index as usize, total_balance, spec)?;

        for (attesting_indices, balance) in [
            (&source_indices, source_balance),
            (&target_indices, target_balance),
            (&head_indices, head_balance),
        ] {
            if attesting_indices.binary_search(&index).is_ok() {
                let reward = base
                    .safe_mul(balance / spec.effective_balance_increment)
                    .map_err(BeaconStateError::ArithError)?
                    / (total_balance / spec.effective_balance_increment);
                rewards[index as usize] += reward;
            } else {
                penalties[index as usize] += base;
            }
        }
    }

    // Inclusion rewards: the earliest inclusion of each source attester pays
    // both the attester and the including proposer.
    for &index in &source_indices {
        let earliest = source_attestations
            .iter()
            .filter(|a| {
                get_attesting_indices(state, &a.data, &a.aggregation_bits, spec)
                    .map_or(false, |indices| indices.binary_search(&index).is_ok())
            })
            .min_by_key(|a| a.inclusion_delay);
        if let Some(attestation) = earliest {
            let base = get_base_reward(state, index as usize, total_balance, spec)?;
            let proposer_reward = base / spec.proposer_reward_quotient;
            rewards[attestation.proposer_index as usize] += proposer_reward;
            let max_attester_reward = base - proposer_reward;
            rewards[index as usize] +=
                max_attester_reward * spec.min_attestation_inclusion_delay
                    / attestation.inclusion_delay.max(1);
        }
    }

    // Inactivity leak.
    let finality_delay = (previous_epoch - state.finalized_checkpoint.epoch).as_u64();
    if finality_delay > spec.min_epochs_to_inactivity_penalty {
        for &index in &eligible {
            let base = get_base_reward(state, index as usize, total_balance, spec)?;
            penalties[index as usize] += spec.base_rewards_per_epoch * base;
            if target_indices.binary_search(&index).is_err() {
                let effective = state
                    .validators
                    .get(index as usize)
                    .ok_or(BeaconStateError::UnknownValidator(index))?
                    .effective_balance;
                penalties[index as usize] +=
                    effective * finality_delay / spec.inactivity_penalty_quotient;
            }
        }
    }

    for index in 0..state.validators.len() {
        increase_balance(state, index, rewards[index])?;
        decrease_balance(state, index, penalties[index])?;
    }
    Ok(())
}

/// Activation eligibility, ejections and churn-limited activations.
pub fn process_registry_updates(
    state: &mut BeaconState,
    summary: &mut EpochSummary,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let current_epoch = state.current_epoch(spec);
    let next_epoch = current_epoch + 1;

    for index in 0..state.validators.len() {
        let validator = &state.validators[index];
        if validator.activation_eligibility_epoch == spec.far_future_epoch
            && validator.effective_balance == spec.max_effective_balance
        {
            state.validators[index].activation_eligibility_epoch = next_epoch;
        }
    }

    let ejectable: Vec<usize> = state
        .validators
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            v.is_active_at(current_epoch) && v.effective_balance <= spec.ejection_balance
        })
        .map(|(i, _)| i)
        .collect();
    for index in ejectable {
        initiate_validator_exit(state, index, spec)?;
        summary.ejected.push(index as u64);
    }

    // Queue eligible validators by eligibility epoch, activate up to the
    // churn limit.
    let mut activation_queue: Vec<(Epoch, u64)> = state
        .validators
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            v.activation_eligibility_epoch != spec.far_future_epoch
                && v.activation_epoch
                    >= activation_exit_epoch(state.finalized_checkpoint.epoch, spec)
        })
        .map(|(i, v)| (v.activation_eligibility_epoch, i as u64))
        .collect();
    activation_queue.sort_unstable();

    let churn_limit = get_churn_limit(state, current_epoch, spec) as usize;
    for (_, index) in activation_queue.into_iter().take(churn_limit) {
        let validator = &mut state.validators[index as usize];
        if validator.activation_epoch == spec.far_future_epoch {
            validator.activation_epoch = activation_exit_epoch(current_epoch, spec);
            summary.activated.push(index);
        }
    }

    summary.exited = state
        .validators
        .iter()
        .enumerate()
        .filter(|(_, v)| v.exit_epoch == next_epoch)
        .map(|(i, _)| i as u64)
        .collect();

    Ok(())
}

/// Correlated slashing penalties at the halfway point of the withdrawal
/// delay.
pub fn process_slashings(
    state: &mut BeaconState,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let current_epoch = state.current_epoch(spec);
    let total_balance = get_total_active_balance(state, current_epoch, spec)?;
    let slashings_sum: u64 = state.slashings.iter().sum();

    let targets: Vec<(usize, u64)> = state
        .validators
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            v.slashed
                && current_epoch + (spec.epochs_per_slashings_vector as u64 / 2)
                    == v.withdrawable_epoch
        })
        .map(|(i, v)| (i, v.effective_balance))
        .collect();

    for (index, effective_balance) in targets {
        let increment = spec.effective_balance_increment;
        let penalty_numerator = (effective_balance / increment)
            .safe_mul(std::cmp::min(slashings_sum.saturating_mul(3), total_balance))
            .map_err(BeaconStateError::ArithError)?;
        let penalty = penalty_numerator / total_balance * increment;
        decrease_balance(state, index, penalty)?;
    }
    Ok(())
}

/// Ring rotation and effective-balance hysteresis.
pub fn process_final_updates(
    state: &mut BeaconState,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let current_epoch = state.current_epoch(spec);
    let next_epoch = current_epoch + 1;

    let epochs_per_voting_period = spec.slots_per_eth1_voting_period / spec.slots_per_epoch;
    if epochs_per_voting_period > 0 && next_epoch.as_u64() % epochs_per_voting_period == 0 {
        state.eth1_data_votes = Default::default();
    }

    let half_increment = spec.effective_balance_increment / 2;
    for index in 0..state.validators.len() {
        let balance = state.balances.get(index).copied().unwrap_or(0);
        let validator = &mut state.validators[index];
        if balance < validator.effective_balance
            || validator.effective_balance + 3 * half_increment < balance
        {
            validator.effective_balance = Validator::compute_effective_balance(balance, spec);
        }
    }

    let slashings_index = next_epoch.as_usize() % spec.epochs_per_slashings_vector;
    if let Some(entry) = state.slashings.get_mut(slashings_index) {
        *entry = 0;
    }

    let current_mix = state.get_randao_mix(current_epoch, spec)?;
    state.set_randao_mix(next_epoch, current_mix, spec)?;

    state.previous_epoch_attestations =
        std::mem::take(&mut state.current_epoch_attestations);
    Ok(())
}
