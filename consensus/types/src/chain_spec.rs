use crate::{Epoch, Slot};
use serde_derive::{Deserialize, Serialize};

/// Domain separators for signed consensus objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    BeaconProposer,
    Randao,
    Attestation,
    Deposit,
    VoluntaryExit,
}

/// Runtime configuration of the beacon chain.
///
/// Passed explicitly through constructors; there is no process-wide
/// configuration singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSpec {
    /*
     * Time parameters
     */
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
    pub min_attestation_inclusion_delay: u64,
    pub min_seed_lookahead: Epoch,
    pub activation_exit_delay: u64,
    pub min_validator_withdrawability_delay: Epoch,
    pub persistent_committee_period: u64,
    pub min_epochs_to_inactivity_penalty: u64,

    /*
     * Committee geometry
     */
    pub target_committee_size: u64,
    pub max_committees_per_slot: u64,
    pub shard_count: u64,
    pub shuffle_round_count: u8,

    /*
     * Balance parameters (gwei)
     */
    pub min_deposit_amount: u64,
    pub max_effective_balance: u64,
    pub ejection_balance: u64,
    pub effective_balance_increment: u64,

    /*
     * Churn
     */
    pub min_per_epoch_churn_limit: u64,
    pub churn_limit_quotient: u64,

    /*
     * Rewards and penalties
     */
    pub base_reward_factor: u64,
    pub base_rewards_per_epoch: u64,
    pub whistleblower_reward_quotient: u64,
    pub proposer_reward_quotient: u64,
    pub inactivity_penalty_quotient: u64,
    pub min_slashing_penalty_quotient: u64,

    /*
     * Initial values
     */
    pub genesis_slot: Slot,
    pub genesis_epoch: Epoch,
    pub far_future_epoch: Epoch,
    pub min_genesis_active_validator_count: u64,
    pub min_genesis_time: u64,
    pub deposit_contract_tree_depth: u64,

    /*
     * State ring lengths
     */
    pub slots_per_historical_root: usize,
    pub epochs_per_historical_vector: usize,
    pub epochs_per_slashings_vector: usize,
    pub slots_per_eth1_voting_period: u64,

    /*
     * Signature domains
     */
    domain_beacon_proposer: u32,
    domain_randao: u32,
    domain_attestation: u32,
    domain_deposit: u32,
    domain_voluntary_exit: u32,
}

impl ChainSpec {
    /// Returns the domain constant for `domain`, mixed with the fork version
    /// by the signing layer.
    pub fn domain_constant(&self, domain: Domain) -> u32 {
        match domain {
            Domain::BeaconProposer => self.domain_beacon_proposer,
            Domain::Randao => self.domain_randao,
            Domain::Attestation => self.domain_attestation,
            Domain::Deposit => self.domain_deposit,
            Domain::VoluntaryExit => self.domain_voluntary_exit,
        }
    }

    /// Compute the 8-byte domain for `domain` under `fork_version`.
    pub fn compute_domain(&self, domain: Domain, fork_version: [u8; 4]) -> u64 {
        let mut bytes = [0_u8; 8];
        bytes[0..4].copy_from_slice(&self.domain_constant(domain).to_le_bytes());
        bytes[4..8].copy_from_slice(&fork_version);
        u64::from_le_bytes(bytes)
    }

    /// Mainnet configuration.
    pub fn mainnet() -> Self {
        Self {
            seconds_per_slot: 12,
            slots_per_epoch: 64,
            min_attestation_inclusion_delay: 1,
            min_seed_lookahead: Epoch::new(1),
            activation_exit_delay: 4,
            min_validator_withdrawability_delay: Epoch::new(256),
            persistent_committee_period: 2_048,
            min_epochs_to_inactivity_penalty: 4,

            target_committee_size: 128,
            max_committees_per_slot: 64,
            shard_count: 1_024,
            shuffle_round_count: 90,

            min_deposit_amount: 1_000_000_000,
            max_effective_balance: 32_000_000_000,
            ejection_balance: 16_000_000_000,
            effective_balance_increment: 1_000_000_000,

            min_per_epoch_churn_limit: 4,
            churn_limit_quotient: 65_536,

            base_reward_factor: 64,
            base_rewards_per_epoch: 4,
            whistleblower_reward_quotient: 512,
            proposer_reward_quotient: 8,
            inactivity_penalty_quotient: 1 << 25,
            min_slashing_penalty_quotient: 32,

            genesis_slot: Slot::new(0),
            genesis_epoch: Epoch::new(0),
            far_future_epoch: Epoch::new(u64::max_value()),
            min_genesis_active_validator_count: 65_536,
            min_genesis_time: 1_578_009_600,
            deposit_contract_tree_depth: 32,

            slots_per_historical_root: 8_192,
            epochs_per_historical_vector: 65_536,
            epochs_per_slashings_vector: 8_192,
            slots_per_eth1_voting_period: 1_024,

            domain_beacon_proposer: 0,
            domain_randao: 1,
            domain_attestation: 2,
            domain_deposit: 3,
            domain_voluntary_exit: 4,
        }
    }

    /// Reduced-size configuration for testing.
    pub fn minimal() -> Self {
        Self {
            seconds_per_slot: 6,
            slots_per_epoch: 8,
            target_committee_size: 4,
            max_committees_per_slot: 4,
            shard_count: 8,
            shuffle_round_count: 10,
            min_genesis_active_validator_count: 64,
            min_genesis_time: 0,
            slots_per_historical_root: 64,
            epochs_per_historical_vector: 64,
            epochs_per_slashings_vector: 64,
            slots_per_eth1_voting_period: 16,
            persistent_committee_period: 128,
            ..ChainSpec::mainnet()
        }
    }
}

impl Default for ChainSpec {
    fn default() -> Self {
        ChainSpec::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_bytes_mix_fork_version() {
        let spec = ChainSpec::minimal();
        let d1 = spec.compute_domain(Domain::Attestation, [0, 0, 0, 0]);
        let d2 = spec.compute_domain(Domain::Attestation, [1, 0, 0, 0]);
        assert_ne!(d1, d2);
        assert_ne!(
            spec.compute_domain(Domain::Randao, [0, 0, 0, 0]),
            spec.compute_domain(Domain::Deposit, [0, 0, 0, 0]),
        );
    }
}
