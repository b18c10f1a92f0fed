use crate::{ChainSpec, Epoch, Hash256, PublicKeyBytes};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

/// Registry entry for a single validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct Validator {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: Hash256,
    pub effective_balance: u64,
    pub slashed: bool,
    pub activation_eligibility_epoch: Epoch,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
}

impl Validator {
    /// `true` if the validator is eligible to participate in duties at `epoch`.
    pub fn is_active_at(&self, epoch: Epoch) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }

    /// `true` if the validator may be slashed at `epoch`.
    pub fn is_slashable_at(&self, epoch: Epoch) -> bool {
        !self.slashed && self.activation_epoch <= epoch && epoch < self.withdrawable_epoch
    }

    /// `true` if the validator has initiated (or been forced into) an exit.
    pub fn is_exited_at(&self, epoch: Epoch) -> bool {
        self.exit_epoch <= epoch
    }
}

impl Default for Validator {
    /// A validator that has never been activated nor exited.
    fn default() -> Self {
        let far_future = Epoch::max_value();
        Self {
            pubkey: PublicKeyBytes::empty(),
            withdrawal_credentials: Hash256::zero(),
            effective_balance: 0,
            slashed: false,
            activation_eligibility_epoch: far_future,
            activation_epoch: far_future,
            exit_epoch: far_future,
            withdrawable_epoch: far_future,
        }
    }
}

impl Validator {
    /// Effective balance used for consensus weighting, derived from `balance`.
    pub fn compute_effective_balance(balance: u64, spec: &ChainSpec) -> u64 {
        std::cmp::min(
            balance - balance % spec.effective_balance_increment,
            spec.max_effective_balance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_never_active() {
        let v = Validator::default();
        assert!(!v.is_active_at(Epoch::new(0)));
        assert!(!v.is_active_at(Epoch::new(u64::max_value())));
        assert!(!v.is_slashable_at(Epoch::new(0)));
    }

    #[test]
    fn effective_balance_is_capped_and_rounded() {
        let spec = ChainSpec::mainnet();
        assert_eq!(
            Validator::compute_effective_balance(33_000_000_000, &spec),
            spec.max_effective_balance
        );
        assert_eq!(
            Validator::compute_effective_balance(31_500_000_000, &spec),
            31_000_000_000
        );
    }
}
