mod committees;
mod merkle;
mod shuffle;
mod signatures;

pub use committees::{
    active_validator_indices, attestation_data_slot, beacon_committee, beacon_proposer_index,
    committee_count_at_epoch, committees_per_slot, get_attesting_indices, get_indexed_attestation,
    CommitteeError,
};
pub use merkle::{verify_merkle_proof, MerkleTree};
pub use shuffle::compute_shuffled_index;
pub use signatures::{verify_aggregate_signature, verify_signature, SignatureError};

use integer_sqrt::IntegerSquareRoot;
use safe_arith::SafeArith;
use types::{BeaconState, BeaconStateError, ChainSpec, Epoch};

/// Add `delta` gwei to the balance of validator `index`.
pub fn increase_balance(
    state: &mut BeaconState,
    index: usize,
    delta: u64,
) -> Result<(), BeaconStateError> {
    let balance = state
        .balances
        .get_mut(index)
        .ok_or(BeaconStateError::UnknownValidator(index as u64))?;
    *balance = balance.saturating_add(delta);
    Ok(())
}

/// Remove `delta` gwei from the balance of validator `index`, flooring at
/// zero.
pub fn decrease_balance(
    state: &mut BeaconState,
    index: usize,
    delta: u64,
) -> Result<(), BeaconStateError> {
    let balance = state
        .balances
        .get_mut(index)
        .ok_or(BeaconStateError::UnknownValidator(index as u64))?;
    *balance = balance.saturating_sub(delta);
    Ok(())
}

/// Sum of effective balances over `indices`, floored at one increment so
/// division by a total never divides by zero.
pub fn get_total_balance(
    state: &BeaconState,
    indices: &[u64],
    spec: &ChainSpec,
) -> Result<u64, BeaconStateError> {
    let mut total = 0_u64;
    for &i in indices {
        total = total.saturating_add(
            state
                .validators
                .get(i as usize)
                .ok_or(BeaconStateError::UnknownValidator(i))?
                .effective_balance,
        );
    }
    Ok(std::cmp::max(total, spec.effective_balance_increment))
}

/// Sum of effective balances over the active set of `epoch`.
pub fn get_total_active_balance(
    state: &BeaconState,
    epoch: Epoch,
    spec: &ChainSpec,
) -> Result<u64, BeaconStateError> {
    get_total_balance(state, &active_validator_indices(state, epoch), spec)
}

/// Validators that may enter or leave the active set this epoch.
pub fn get_churn_limit(state: &BeaconState, epoch: Epoch, spec: &ChainSpec) -> u64 {
    std::cmp::max(
        spec.min_per_epoch_churn_limit,
        active_validator_indices(state, epoch).len() as u64 / spec.churn_limit_quotient,
    )
}

/// The first epoch at which an activation or exit initiated in `epoch` takes
/// effect.
pub fn activation_exit_epoch(epoch: Epoch, spec: &ChainSpec) -> Epoch {
    epoch + 1 + spec.activation_exit_delay
}

/// Per-component base reward for validator `index` against
/// `total_active_balance`.
pub fn get_base_reward(
    state: &BeaconState,
    index: usize,
    total_active_balance: u64,
    spec: &ChainSpec,
) -> Result<u64, BeaconStateError> {
    let effective = state
        .validators
        .get(index)
        .ok_or(BeaconStateError::UnknownValidator(index as u64))?
        .effective_balance;
    Ok(effective
        .safe_mul(spec.base_reward_factor)
        .map_err(BeaconStateError::ArithError)?
        .safe_div(total_active_balance.integer_sqrt())
        .map_err(BeaconStateError::ArithError)?
        / spec.base_rewards_per_epoch)
}

/// Move validator `index` into the exit queue, churn-limited.
///
/// Idempotent: a validator already exiting is left untouched.
pub fn initiate_validator_exit(
    state: &mut BeaconState,
    index: usize,
    spec: &ChainSpec,
) -> Result<(), BeaconStateError> {
    let far_future = spec.far_future_epoch;
    if state
        .validators
        .get(index)
        .ok_or(BeaconStateError::UnknownValidator(index as u64))?
        .exit_epoch
        != far_future
    {
        return Ok(());
    }

    // The exit queue drains at the churn limit per epoch; join at the back.
    let current_epoch = state.current_epoch(spec);
    let mut exit_queue_epoch = state
        .validators
        .iter()
        .filter(|v| v.exit_epoch != far_future)
        .map(|v| v.exit_epoch)
        .max()
        .unwrap_or_else(|| activation_exit_epoch(current_epoch, spec));
    exit_queue_epoch = std::cmp::max(exit_queue_epoch, activation_exit_epoch(current_epoch, spec));

    let exit_queue_churn = state
        .validators
        .iter()
        .filter(|v| v.exit_epoch == exit_queue_epoch)
        .count() as u64;
    if exit_queue_churn >= get_churn_limit(state, current_epoch, spec) {
        exit_queue_epoch += 1;
    }

    let validator = state
        .validators
        .get_mut(index)
        .ok_or(BeaconStateError::UnknownValidator(index as u64))?;
    validator.exit_epoch = exit_queue_epoch;
    validator.withdrawable_epoch =
        exit_queue_epoch + spec.min_validator_withdrawability_delay.as_u64();
    Ok(())
}

/// Slash validator `slashed_index`, rewarding the proposer and optional
/// whistleblower.
pub fn slash_validator(
    state: &mut BeaconState,
    slashed_index: usize,
    whistleblower_index: Option<usize>,
    spec: &ChainSpec,
) -> Result<(), BeaconStateError> {
    let current_epoch = state.current_epoch(spec);
    initiate_validator_exit(state, slashed_index, spec)?;

    let effective_balance = {
        let validator = state
            .validators
            .get_mut(slashed_index)
            .ok_or(BeaconStateError::UnknownValidator(slashed_index as u64))?;
        validator.slashed = true;
        validator.withdrawable_epoch = std::cmp::max(
            validator.withdrawable_epoch,
            current_epoch + spec.epochs_per_slashings_vector as u64,
        );
        validator.effective_balance
    };

    let slashings_index = current_epoch.as_usize() % spec.epochs_per_slashings_vector;
    if let Some(entry) = state.slashings.get_mut(slashings_index) {
        *entry = entry.saturating_add(effective_balance);
    }
    decrease_balance(
        state,
        slashed_index,
        effective_balance / spec.min_slashing_penalty_quotient,
    )?;

    let proposer_index = beacon_proposer_index(state, spec)
        .map_err(|_| BeaconStateError::InsufficientValidators)? as usize;
    let whistleblower_index = whistleblower_index.unwrap_or(proposer_index);
    let whistleblower_reward = effective_balance / spec.whistleblower_reward_quotient;
    let proposer_reward = whistleblower_reward / spec.proposer_reward_quotient;

    increase_balance(state, proposer_index, proposer_reward)?;
    increase_balance(
        state,
        whistleblower_index,
        whistleblower_reward - proposer_reward,
    )?;
    Ok(())
}
