//! The query layer backing the node's read API.
//!
//! The transport (gRPC/HTTP gateway) lives outside the consensus core; these
//! methods compute the responses it serves. Empty filter results are empty
//! lists, never errors.

use crate::beacon_chain::BeaconChain;
use crate::errors::BeaconChainError;
use crate::BeaconChainTypes;
use serde_derive::{Deserialize, Serialize};
use state_processing::common::{beacon_proposer_index, committees_per_slot, get_churn_limit};
use types::{
    Attestation, BeaconBlock, BeaconState, Epoch, Hash256, PendingAttestation, PublicKeyBytes,
    Slot,
};

/// Filter for block and attestation listings; exactly one field is set.
#[derive(Debug, Clone, Copy)]
pub enum ListFilter {
    Root(Hash256),
    Slot(Slot),
    Epoch(Epoch),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainHead {
    pub block_root: Hash256,
    pub block_slot: Slot,
    pub finalized_slot: Slot,
    pub finalized_block_root: Hash256,
    pub justified_slot: Slot,
    pub justified_block_root: Hash256,
    pub previous_justified_slot: Slot,
    pub previous_justified_block_root: Hash256,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorBalance {
    pub pubkey: PublicKeyBytes,
    pub index: u64,
    pub balance_gwei: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorPage {
    pub epoch: Epoch,
    pub validators: Vec<PublicKeyBytes>,
    pub next_page_token: String,
    pub total_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveSetChanges {
    pub activated: Vec<PublicKeyBytes>,
    pub exited: Vec<PublicKeyBytes>,
    pub ejected: Vec<PublicKeyBytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorQueue {
    pub churn_limit: u64,
    pub activation_pubkeys: Vec<PublicKeyBytes>,
    pub exit_pubkeys: Vec<PublicKeyBytes>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorAssignment {
    pub committee: Vec<u64>,
    pub shard: u64,
    pub slot: Slot,
    pub proposer: bool,
    pub pubkey: PublicKeyBytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorParticipation {
    pub epoch: Epoch,
    pub finalized: bool,
    pub participation_rate: f32,
    pub voted_gwei: u64,
    pub eligible_gwei: u64,
}

fn parse_page_token(token: &str) -> usize {
    token.parse().unwrap_or(0)
}

fn page_bounds(total: usize, page_size: usize, token: &str) -> (usize, usize, String) {
    let start = parse_page_token(token).min(total);
    let end = start.saturating_add(page_size).min(total);
    let next = if end < total {
        end.to_string()
    } else {
        String::new()
    };
    (start, end, next)
}

impl<T: BeaconChainTypes> BeaconChain<T> {
    fn head_state(&self) -> Result<BeaconState, BeaconChainError> {
        self.db
            .head_state(&store::Context::new())?
            .ok_or(BeaconChainError::NotInitialized)
    }

    /// The canonical head with its justification and finalization context.
    pub fn chain_head(&self) -> Result<ChainHead, BeaconChainError> {
        let head = self.db.chain_head()?;
        let state = self.head_state()?;
        let justified = self.db.justified_block()?;
        let finalized = self.db.finalized_block()?;

        Ok(ChainHead {
            block_root: head.canonical_root(),
            block_slot: head.slot,
            finalized_slot: finalized.slot,
            finalized_block_root: finalized.canonical_root(),
            justified_slot: justified.slot,
            justified_block_root: justified.canonical_root(),
            previous_justified_slot: state
                .previous_justified_checkpoint
                .epoch
                .start_slot(self.spec().slots_per_epoch),
            previous_justified_block_root: state.previous_justified_checkpoint.root,
        })
    }

    /// Blocks matching the filter; multiple entries on unfinalized forks.
    pub fn list_blocks(&self, filter: ListFilter) -> Result<Vec<BeaconBlock>, BeaconChainError> {
        match filter {
            ListFilter::Root(root) => Ok(self.db.block(root)?.into_iter().collect()),
            ListFilter::Slot(slot) => Ok(self.db.blocks_by_slot(slot)?),
            ListFilter::Epoch(epoch) => {
                let mut blocks = vec![];
                let start = epoch.start_slot(self.spec().slots_per_epoch);
                let end = epoch.end_slot(self.spec().slots_per_epoch);
                let mut slot = start;
                while slot <= end {
                    blocks.extend(self.db.blocks_by_slot(slot)?);
                    slot += 1;
                }
                Ok(blocks)
            }
        }
    }

    /// Attestations folded into the head state, filtered.
    pub fn list_attestations(
        &self,
        filter: ListFilter,
    ) -> Result<Vec<PendingAttestation>, BeaconChainError> {
        let state = self.head_state()?;
        let matches = |a: &PendingAttestation| match filter {
            ListFilter::Root(root) => a.data.beacon_block_root == root,
            ListFilter::Slot(slot) => a.data.slot == slot,
            ListFilter::Epoch(epoch) => a.data.target.epoch == epoch,
        };
        Ok(state
            .previous_epoch_attestations
            .iter()
            .chain(state.current_epoch_attestations.iter())
            .filter(|a| matches(a))
            .cloned()
            .collect())
    }

    /// The operation pool's uncommitted attestations.
    pub fn attestation_pool(&self) -> Vec<Attestation> {
        self.op_pool().pool_attestations()
    }

    /// Balances for the requested validators; both pubkey and index filters
    /// resolve against the head state.
    pub fn validator_balances(
        &self,
        pubkeys: &[PublicKeyBytes],
        indices: &[u64],
    ) -> Result<Vec<ValidatorBalance>, BeaconChainError> {
        let state = self.head_state()?;
        let mut wanted: Vec<u64> = indices.to_vec();
        for pubkey in pubkeys {
            if let Some(index) = state.get_validator_index(pubkey) {
                wanted.push(index);
            }
        }
        wanted.sort_unstable();
        wanted.dedup();

        let mut balances = vec![];
        for index in wanted {
            if let (Some(validator), Some(balance)) = (
                state.validators.get(index as usize),
                state.balances.get(index as usize),
            ) {
                balances.push(ValidatorBalance {
                    pubkey: validator.pubkey,
                    index,
                    balance_gwei: *balance,
                });
            }
        }
        Ok(balances)
    }

    /// Paginated registry listing for `epoch`.
    pub fn validators(
        &self,
        epoch: Epoch,
        page_size: usize,
        page_token: &str,
    ) -> Result<ValidatorPage, BeaconChainError> {
        let state = self.head_state()?;
        let pubkeys: Vec<PublicKeyBytes> = state
            .validators
            .iter()
            .filter(|v| v.activation_eligibility_epoch <= epoch || v.is_active_at(epoch))
            .map(|v| v.pubkey)
            .collect();

        let (start, end, next_page_token) = page_bounds(pubkeys.len(), page_size, page_token);
        Ok(ValidatorPage {
            epoch,
            total_size: pubkeys.len(),
            validators: pubkeys[start..end].to_vec(),
            next_page_token,
        })
    }

    /// Registry movement at `epoch`.
    pub fn active_set_changes(&self, epoch: Epoch) -> Result<ActiveSetChanges, BeaconChainError> {
        let state = self.head_state()?;
        let mut changes = ActiveSetChanges::default();
        for validator in state.validators.iter() {
            if validator.activation_epoch == epoch {
                changes.activated.push(validator.pubkey);
            }
            if validator.exit_epoch == epoch {
                if validator.effective_balance <= self.spec().ejection_balance {
                    changes.ejected.push(validator.pubkey);
                } else {
                    changes.exited.push(validator.pubkey);
                }
            }
        }
        Ok(changes)
    }

    /// Validators waiting to enter or leave the active set.
    pub fn validator_queue(&self) -> Result<ValidatorQueue, BeaconChainError> {
        let state = self.head_state()?;
        let spec = self.spec();
        let current_epoch = state.current_epoch(spec);
        let far_future = spec.far_future_epoch;

        let mut queue = ValidatorQueue {
            churn_limit: get_churn_limit(&state, current_epoch, spec),
            ..ValidatorQueue::default()
        };
        for validator in state.validators.iter() {
            if validator.activation_eligibility_epoch != far_future
                && validator.activation_epoch > current_epoch
            {
                queue.activation_pubkeys.push(validator.pubkey);
            }
            if validator.exit_epoch != far_future && validator.exit_epoch > current_epoch {
                queue.exit_pubkeys.push(validator.pubkey);
            }
        }
        Ok(queue)
    }

    /// Paginated committee and proposer assignments for `epoch`.
    ///
    /// With an empty filter, every active validator is listed.
    pub fn validator_assignments(
        &self,
        epoch: Epoch,
        indices: &[u64],
        page_size: usize,
        page_token: &str,
    ) -> Result<(Vec<ValidatorAssignment>, String, usize), BeaconChainError> {
        let state = self.head_state()?;
        let spec = self.spec();

        let wanted: Vec<u64> = if indices.is_empty() {
            self.caches.active_indices(&state, epoch)
        } else {
            indices.to_vec()
        };
        let (start, end, next_page_token) = page_bounds(wanted.len(), page_size, page_token);

        let per_slot = committees_per_slot(self.caches.active_indices(&state, epoch).len(), spec);
        let start_shard = self.caches.start_shard(&state, epoch, spec);
        let first_slot = epoch.start_slot(spec.slots_per_epoch);

        let mut assignments = vec![];
        for &index in &wanted[start..end] {
            let pubkey = match state.validators.get(index as usize) {
                Some(validator) => validator.pubkey,
                None => continue,
            };

            'search: for slot_offset in 0..spec.slots_per_epoch {
                let slot = first_slot + slot_offset;
                for committee_index in 0..per_slot {
                    let committee =
                        match self.caches.committee(&state, slot, committee_index, spec) {
                            Ok(committee) => committee,
                            Err(_) => continue,
                        };
                    if committee.contains(&index) {
                        let mut at_slot = state.clone();
                        at_slot.slot = slot;
                        let proposer = beacon_proposer_index(&at_slot, spec)
                            .map_or(false, |proposer| proposer == index);
                        let shard = (start_shard
                            + (slot_offset * per_slot + committee_index))
                            % spec.shard_count;
                        assignments.push(ValidatorAssignment {
                            committee,
                            shard,
                            slot,
                            proposer,
                            pubkey,
                        });
                        break 'search;
                    }
                }
            }
        }
        Ok((assignments, next_page_token, wanted.len()))
    }

    /// FFG participation for a processed epoch.
    pub fn participation(&self, epoch: Epoch) -> Result<ValidatorParticipation, BeaconChainError> {
        let (voted_gwei, eligible_gwei) = self
            .participation_for(epoch)
            .unwrap_or((0, 0));
        let participation_rate = if eligible_gwei == 0 {
            0.0
        } else {
            voted_gwei as f32 / eligible_gwei as f32
        };
        Ok(ValidatorParticipation {
            epoch,
            finalized: epoch <= self.finalized_epoch(),
            participation_rate,
            voted_gwei,
            eligible_gwei,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_clamp_and_terminate() {
        assert_eq!(page_bounds(10, 4, ""), (0, 4, "4".to_string()));
        assert_eq!(page_bounds(10, 4, "4"), (4, 8, "8".to_string()));
        assert_eq!(page_bounds(10, 4, "8"), (8, 10, String::new()));
        assert_eq!(page_bounds(10, 4, "99"), (10, 10, String::new()));
        assert_eq!(page_bounds(0, 4, ""), (0, 0, String::new()));
    }
}
