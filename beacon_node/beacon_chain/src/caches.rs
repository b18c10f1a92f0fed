//! Memoization over deterministic functions of state.
//!
//! Every cache here must hold only values derivable from the current state;
//! they are all cleared together when finalization advances.

use parking_lot::RwLock;
use state_processing::common::{
    active_validator_indices, beacon_committee, committees_per_slot, CommitteeError,
};
use std::collections::HashMap;
use types::{BeaconState, ChainSpec, CommitteeIndex, Epoch, Slot};

#[derive(Default)]
pub struct HelperCaches {
    active_indices: RwLock<HashMap<Epoch, Vec<u64>>>,
    committees: RwLock<HashMap<(Slot, CommitteeIndex), Vec<u64>>>,
    start_shards: RwLock<HashMap<Epoch, u64>>,
}

impl HelperCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_indices(&self, state: &BeaconState, epoch: Epoch) -> Vec<u64> {
        if let Some(cached) = self.active_indices.read().get(&epoch) {
            return cached.clone();
        }
        let indices = active_validator_indices(state, epoch);
        self.active_indices.write().insert(epoch, indices.clone());
        indices
    }

    pub fn committee(
        &self,
        state: &BeaconState,
        slot: Slot,
        index: CommitteeIndex,
        spec: &ChainSpec,
    ) -> Result<Vec<u64>, CommitteeError> {
        if let Some(cached) = self.committees.read().get(&(slot, index)) {
            return Ok(cached.clone());
        }
        let committee = beacon_committee(state, slot, index, spec)?;
        self.committees.write().insert((slot, index), committee.clone());
        Ok(committee)
    }

    /// The first shard assigned to `epoch`'s committees.
    pub fn start_shard(&self, state: &BeaconState, epoch: Epoch, spec: &ChainSpec) -> u64 {
        if let Some(cached) = self.start_shards.read().get(&epoch) {
            return *cached;
        }
        let per_slot = committees_per_slot(self.active_indices(state, epoch).len(), spec);
        let shard = (epoch.as_u64() * per_slot * spec.slots_per_epoch) % spec.shard_count;
        self.start_shards.write().insert(epoch, shard);
        shard
    }

    /// Drop everything. Called when finalization advances; stale shuffling
    /// data must never survive a finality boundary.
    pub fn clear_all(&self) {
        self.active_indices.write().clear();
        self.committees.write().clear();
        self.start_shards.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_all_empties_every_cache() {
        let caches = HelperCaches::new();
        caches.active_indices.write().insert(Epoch::new(1), vec![1]);
        caches.committees.write().insert((Slot::new(1), 0), vec![2]);
        caches.start_shards.write().insert(Epoch::new(1), 3);

        caches.clear_all();
        assert!(caches.active_indices.read().is_empty());
        assert!(caches.committees.read().is_empty());
        assert!(caches.start_shards.read().is_empty());
    }
}
