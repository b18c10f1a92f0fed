//! Applies a block to a state whose slot already equals the block's slot.

pub mod errors;

use crate::common::{
    attestation_data_slot, get_indexed_attestation, increase_balance, initiate_validator_exit,
    slash_validator, verify_aggregate_signature, verify_merkle_proof, verify_signature,
};
use crate::TransitionConfig;
use errors::{AttestationInvalid, BlockInvalid, BlockProcessingError};
use ethereum_hashing::hash;
use ssz_types::typenum::Unsigned;
use tree_hash::TreeHash;
use types::{
    AttestationDataAndCustodyBit, BeaconBlock, BeaconState, BeaconStateError, ChainSpec, Deposit,
    Domain, Hash256, IndexedAttestation, PendingAttestation, Validator,
};

/// Apply `block` to `state`.
///
/// The state is mutated even on error; callers work on a copy.
pub fn per_block_processing(
    state: &mut BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    process_block_header(state, block, spec)?;
    process_randao(state, block, config, spec)?;
    process_eth1_data(state, block, spec)?;
    process_proposer_slashings(state, block, config, spec)?;
    process_attester_slashings(state, block, config, spec)?;
    process_attestations(state, block, config, spec)?;
    process_deposits(state, block, config, spec)?;
    process_exits(state, block, config, spec)?;
    Ok(())
}

pub fn process_block_header(
    state: &mut BeaconState,
    block: &BeaconBlock,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    if block.slot != state.slot {
        return Err(BlockInvalid::StateSlotMismatch {
            state: state.slot,
            block: block.slot,
        }
        .into());
    }

    let expected_parent = state.latest_block_header.canonical_root();
    if block.parent_root != expected_parent {
        return Err(BlockInvalid::ParentBlockRootMismatch {
            state: expected_parent,
            block: block.parent_root,
        }
        .into());
    }

    state.latest_block_header = block.temporary_block_header();

    let proposer_index = crate::common::beacon_proposer_index(state, spec)?;
    let proposer = state
        .validators
        .get(proposer_index as usize)
        .ok_or(BeaconStateError::UnknownValidator(proposer_index))?;
    if proposer.slashed {
        return Err(BlockInvalid::ProposerSlashed(proposer_index).into());
    }
    Ok(())
}

pub fn process_randao(
    state: &mut BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let current_epoch = state.current_epoch(spec);

    if config.verify_signatures {
        let proposer_index = crate::common::beacon_proposer_index(state, spec)?;
        let proposer_pubkey = state
            .validators
            .get(proposer_index as usize)
            .ok_or(BeaconStateError::UnknownValidator(proposer_index))?
            .pubkey;
        let domain = spec.compute_domain(Domain::Randao, state.fork.version_at(current_epoch));
        if !verify_signature(
            &proposer_pubkey,
            current_epoch.tree_hash_root(),
            &block.body.randao_reveal,
            domain,
        )? {
            return Err(BlockInvalid::BadRandaoSignature.into());
        }
    }

    let mix = {
        let current = state.get_randao_mix(current_epoch, spec)?;
        let reveal_digest = hash(block.body.randao_reveal.as_bytes());
        let mut mixed = [0_u8; 32];
        for (i, byte) in mixed.iter_mut().enumerate() {
            *byte = current[i] ^ reveal_digest[i];
        }
        Hash256::from_slice(&mixed)
    };
    state.set_randao_mix(current_epoch, mix, spec)?;
    Ok(())
}

pub fn process_eth1_data(
    state: &mut BeaconState,
    block: &BeaconBlock,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    state
        .eth1_data_votes
        .push(block.body.eth1_data.clone())
        .map_err(|_| BeaconStateError::RingLengthExceedsBound)?;

    let votes_for_new = state
        .eth1_data_votes
        .iter()
        .filter(|vote| **vote == block.body.eth1_data)
        .count() as u64;
    if votes_for_new * 2 > spec.slots_per_eth1_voting_period {
        state.eth1_data = block.body.eth1_data.clone();
    }
    Ok(())
}

fn process_proposer_slashings(
    state: &mut BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    for slashing in block.body.proposer_slashings.iter() {
        let index = slashing.proposer_index;
        let invalid = |reason: &str| BlockInvalid::ProposerSlashingInvalid {
            index,
            reason: reason.into(),
        };

        let h1 = &slashing.header_1;
        let h2 = &slashing.header_2;
        if h1.header.slot.epoch(spec.slots_per_epoch) != h2.header.slot.epoch(spec.slots_per_epoch)
        {
            return Err(invalid("headers are from different epochs").into());
        }
        if h1.header == h2.header {
            return Err(invalid("headers are identical").into());
        }

        let proposer = state
            .validators
            .get(index as usize)
            .ok_or(BeaconStateError::UnknownValidator(index))?;
        if !proposer.is_slashable_at(state.current_epoch(spec)) {
            return Err(invalid("proposer is not slashable").into());
        }

        if config.verify_signatures {
            for signed in [h1, h2] {
                let domain = spec.compute_domain(
                    Domain::BeaconProposer,
                    state
                        .fork
                        .version_at(signed.header.slot.epoch(spec.slots_per_epoch)),
                );
                if !verify_signature(
                    &proposer.pubkey,
                    signed.header.tree_hash_root(),
                    &signed.signature,
                    domain,
                )? {
                    return Err(invalid("bad header signature").into());
                }
            }
        }

        slash_validator(state, index as usize, None, spec)?;
    }
    Ok(())
}

fn process_attester_slashings(
    state: &mut BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    for slashing in block.body.attester_slashings.iter() {
        let att_1 = &slashing.attestation_1;
        let att_2 = &slashing.attestation_2;

        if !att_1.is_slashable(att_2) {
            return Err(
                BlockInvalid::AttesterSlashingInvalid("attestations are not slashable".into())
                    .into(),
            );
        }
        for att in [att_1, att_2] {
            is_valid_indexed_attestation(state, att, config, spec)
                .map_err(|e| BlockInvalid::AttesterSlashingInvalid(format!("{:?}", e)))?;
        }

        let current_epoch = state.current_epoch(spec);
        let set_1: Vec<u64> = att_1.attesting_indices().collect();
        let mut slashable: Vec<u64> = att_2
            .attesting_indices()
            .filter(|i| set_1.contains(i))
            .filter(|i| {
                state
                    .validators
                    .get(*i as usize)
                    .map_or(false, |v| v.is_slashable_at(current_epoch))
            })
            .collect();
        slashable.sort_unstable();
        slashable.dedup();

        if slashable.is_empty() {
            return Err(
                BlockInvalid::AttesterSlashingInvalid("no slashable indices".into()).into(),
            );
        }
        for i in slashable {
            slash_validator(state, i as usize, None, spec)?;
        }
    }
    Ok(())
}

fn process_attestations(
    state: &mut BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    // The proposer is fixed for all attestations in the block.
    let proposer_index = crate::common::beacon_proposer_index(state, spec)?;

    for (i, attestation) in block.body.attestations.iter().enumerate() {
        let invalid =
            |reason: AttestationInvalid| BlockInvalid::AttestationInvalid { index: i, reason };

        let data = &attestation.data;
        let current_epoch = state.current_epoch(spec);
        let previous_epoch = state.previous_epoch(spec);

        if data.target.epoch != current_epoch && data.target.epoch != previous_epoch {
            return Err(invalid(AttestationInvalid::WrongEpoch {
                target: data.target.epoch,
                current: current_epoch,
            })
            .into());
        }

        let expected_source = if data.target.epoch == current_epoch {
            state.current_justified_checkpoint
        } else {
            state.previous_justified_checkpoint
        };
        if data.source != expected_source {
            return Err(invalid(AttestationInvalid::WrongJustifiedCheckpoint).into());
        }

        let attestation_slot = attestation_data_slot(state, data, spec)
            .map_err(|_| invalid(AttestationInvalid::BadCommitteeIndex))?;
        let min_inclusion = attestation_slot + spec.min_attestation_inclusion_delay;
        let max_inclusion = attestation_slot + spec.slots_per_epoch;
        if state.slot < min_inclusion || state.slot > max_inclusion {
            return Err(invalid(AttestationInvalid::IncludedOutOfWindow {
                attestation_slot,
                state_slot: state.slot,
            })
            .into());
        }

        let indexed = get_indexed_attestation(state, attestation, spec)
            .map_err(|e| invalid(AttestationInvalid::BadIndexedAttestation(format!("{:?}", e))))?;
        is_valid_indexed_attestation(state, &indexed, config, spec)
            .map_err(|e| invalid(AttestationInvalid::BadIndexedAttestation(format!("{:?}", e))))?;

        let pending = PendingAttestation {
            aggregation_bits: attestation.aggregation_bits.clone(),
            data: data.clone(),
            inclusion_delay: (state.slot - attestation_slot).as_u64(),
            proposer_index,
        };
        if data.target.epoch == current_epoch {
            state
                .current_epoch_attestations
                .push(pending)
                .map_err(|_| BeaconStateError::RingLengthExceedsBound)?;
        } else {
            state
                .previous_epoch_attestations
                .push(pending)
                .map_err(|_| BeaconStateError::RingLengthExceedsBound)?;
        }
    }
    Ok(())
}

/// Structural and (optionally) cryptographic validity of an indexed
/// attestation.
pub fn is_valid_indexed_attestation(
    state: &BeaconState,
    indexed: &IndexedAttestation,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let bit_0 = &indexed.custody_bit_0_indices;
    let bit_1 = &indexed.custody_bit_1_indices;
    let invalid = |reason: &str| {
        BlockProcessingError::Invalid(BlockInvalid::IndexedAttestationInvalid(reason.into()))
    };

    // Custody bits are not yet in use; a set bit-1 list is malformed.
    if !bit_1.is_empty() {
        return Err(invalid("custody bit 1 set before custody game phase"));
    }
    if bit_0.is_empty() {
        return Err(invalid("no attesting indices"));
    }

    let sorted_unique = |list: &[u64]| list.windows(2).all(|w| w[0] < w[1]);
    if !sorted_unique(bit_0) || !sorted_unique(bit_1) {
        return Err(invalid("indices not sorted and unique"));
    }

    if config.verify_signatures {
        let pubkeys = bit_0
            .iter()
            .map(|i| {
                state
                    .validators
                    .get(*i as usize)
                    .map(|v| &v.pubkey)
                    .ok_or(BeaconStateError::UnknownValidator(*i))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let message = AttestationDataAndCustodyBit {
            data: indexed.data.clone(),
            custody_bit: false,
        }
        .tree_hash_root();
        let domain = spec.compute_domain(
            Domain::Attestation,
            state.fork.version_at(indexed.data.target.epoch),
        );
        if !verify_aggregate_signature(&pubkeys, message, &indexed.signature, domain)? {
            return Err(invalid("bad aggregate signature"));
        }
    }
    Ok(())
}

fn process_deposits(
    state: &mut BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let expected = std::cmp::min(
        <types::consts::MaxDeposits as Unsigned>::to_u64(),
        state
            .eth1_data
            .deposit_count
            .saturating_sub(state.eth1_deposit_index),
    );
    if block.body.deposits.len() as u64 != expected {
        return Err(BlockInvalid::DepositCountMismatch {
            expected,
            found: block.body.deposits.len() as u64,
        }
        .into());
    }

    for deposit in block.body.deposits.iter() {
        process_deposit(state, deposit, config, spec, true)?;
    }
    Ok(())
}

/// Apply one deposit. With `verify_proof`, the merkle branch is checked
/// against the state's eth1 deposit root at the state's deposit index.
pub fn process_deposit(
    state: &mut BeaconState,
    deposit: &Deposit,
    config: &TransitionConfig,
    spec: &ChainSpec,
    verify_proof: bool,
) -> Result<(), BlockProcessingError> {
    let index = state.eth1_deposit_index;
    if verify_proof {
        let leaf = deposit.data.tree_hash_root();
        if !verify_merkle_proof(
            leaf,
            &deposit.proof,
            spec.deposit_contract_tree_depth as usize + 1,
            index as usize,
            state.eth1_data.deposit_root,
        ) {
            return Err(BlockInvalid::DepositProofInvalid { index }.into());
        }
    }
    state.eth1_deposit_index += 1;

    let pubkey = deposit.data.pubkey;
    let amount = deposit.data.amount;

    match state.get_validator_index(&pubkey) {
        Some(existing) => {
            increase_balance(state, existing as usize, amount)?;
        }
        None => {
            // A fresh deposit carries a proof of possession; one that fails
            // is skipped without failing the block.
            if config.verify_signatures {
                let domain = spec.compute_domain(Domain::Deposit, state.fork.current_version);
                let proof_of_possession = {
                    let mut unsigned = deposit.data.clone();
                    unsigned.signature = types::SignatureBytes::empty();
                    verify_signature(
                        &pubkey,
                        unsigned.tree_hash_root(),
                        &deposit.data.signature,
                        domain,
                    )
                    .unwrap_or(false)
                };
                if !proof_of_possession {
                    return Ok(());
                }
            }

            state
                .validators
                .push(Validator {
                    pubkey,
                    withdrawal_credentials: deposit.data.withdrawal_credentials,
                    effective_balance: Validator::compute_effective_balance(amount, spec),
                    ..Validator::default()
                })
                .map_err(|_| BeaconStateError::RingLengthExceedsBound)?;
            state
                .balances
                .push(amount)
                .map_err(|_| BeaconStateError::RingLengthExceedsBound)?;
        }
    }
    Ok(())
}

fn process_exits(
    state: &mut BeaconState,
    block: &BeaconBlock,
    config: &TransitionConfig,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    for exit in block.body.voluntary_exits.iter() {
        let index = exit.validator_index;
        let invalid = |reason: &str| BlockInvalid::ExitInvalid {
            index,
            reason: reason.into(),
        };

        let current_epoch = state.current_epoch(spec);
        let validator = state
            .validators
            .get(index as usize)
            .ok_or(BeaconStateError::UnknownValidator(index))?;

        if !validator.is_active_at(current_epoch) {
            return Err(invalid("validator is not active").into());
        }
        if validator.exit_epoch != spec.far_future_epoch {
            return Err(invalid("exit already initiated").into());
        }
        if current_epoch < exit.epoch {
            return Err(invalid("exit epoch is in the future").into());
        }
        if current_epoch < validator.activation_epoch + spec.persistent_committee_period {
            return Err(invalid("validator has not served long enough").into());
        }

        if config.verify_signatures {
            let domain =
                spec.compute_domain(Domain::VoluntaryExit, state.fork.version_at(exit.epoch));
            let mut unsigned = exit.clone();
            unsigned.signature = types::SignatureBytes::empty();
            if !verify_signature(
                &validator.pubkey,
                unsigned.tree_hash_root(),
                &exit.signature,
                domain,
            )? {
                return Err(invalid("bad exit signature").into());
            }
        }

        initiate_validator_exit(state, index as usize, spec)?;
    }
    Ok(())
}
