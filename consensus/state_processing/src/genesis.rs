//! Construction of the genesis state from the chain-start deposit set.

use crate::common::MerkleTree;
use crate::per_block_processing::errors::BlockProcessingError;
use crate::per_block_processing::process_deposit;
use crate::TransitionConfig;
use ethereum_hashing::hash;
use tree_hash::TreeHash;
use types::{
    BeaconBlock, BeaconState, BeaconStateError, ChainSpec, Deposit, DepositData, Eth1Data, Hash256,
};

#[derive(Debug, PartialEq, Clone)]
pub enum GenesisError {
    BeaconStateError(BeaconStateError),
    BlockProcessingError(BlockProcessingError),
}

impl From<BeaconStateError> for GenesisError {
    fn from(e: BeaconStateError) -> Self {
        GenesisError::BeaconStateError(e)
    }
}

impl From<BlockProcessingError> for GenesisError {
    fn from(e: BlockProcessingError) -> Self {
        GenesisError::BlockProcessingError(e)
    }
}

/// Build the genesis state from the chain-start deposits.
///
/// Deposit proofs are not re-verified here; the deposit watcher vouches for
/// the chain-start set.
pub fn initialize_beacon_state_from_eth1(
    genesis_time: u64,
    deposits: &[Deposit],
    eth1_data: Eth1Data,
    spec: &ChainSpec,
) -> Result<BeaconState, GenesisError> {
    let mut state = BeaconState::new(genesis_time, eth1_data, spec)?;
    state.latest_block_header = BeaconBlock::empty(spec.genesis_slot).temporary_block_header();

    let config = TransitionConfig {
        verify_signatures: false,
    };
    for deposit in deposits {
        process_deposit(&mut state, deposit, &config, spec, false)?;
    }
    process_activations(&mut state, spec);

    Ok(state)
}

/// Activate every genesis validator carrying a full effective balance.
pub fn process_activations(state: &mut BeaconState, spec: &ChainSpec) {
    for validator in state.validators.iter_mut() {
        if validator.effective_balance == spec.max_effective_balance {
            validator.activation_eligibility_epoch = spec.genesis_epoch;
            validator.activation_epoch = spec.genesis_epoch;
        }
    }
}

/// `true` if `state` satisfies the chain-start conditions.
pub fn is_valid_genesis_state(state: &BeaconState, spec: &ChainSpec) -> bool {
    state.genesis_time >= spec.min_genesis_time
        && crate::common::active_validator_indices(state, spec.genesis_epoch).len() as u64
            >= spec.min_genesis_active_validator_count
}

/// The unique block at the genesis slot, carrying the genesis state root.
pub fn genesis_block(state_root: Hash256, spec: &ChainSpec) -> BeaconBlock {
    let mut block = BeaconBlock::empty(spec.genesis_slot);
    block.state_root = state_root;
    block
}

/// Build chain-start deposits with merkle proofs over the incremental
/// deposit tree, returning the deposits and the final mixed-in root.
pub fn genesis_deposits(
    deposit_data: Vec<DepositData>,
    spec: &ChainSpec,
) -> (Vec<Deposit>, Hash256) {
    let depth = spec.deposit_contract_tree_depth as usize;
    let leaves: Vec<Hash256> = deposit_data.iter().map(|d| d.tree_hash_root()).collect();

    let mut deposits = vec![];
    for (i, data) in deposit_data.into_iter().enumerate() {
        let tree = MerkleTree::create(&leaves[0..=i], depth);
        let mut proof = tree.generate_proof(i, depth);
        proof.push(count_to_node((i + 1) as u64));
        deposits.push(Deposit {
            proof: proof.into(),
            data,
        });
    }

    let root = {
        let tree = MerkleTree::create(&leaves, depth);
        mix_in_count(tree.root(), leaves.len() as u64)
    };
    (deposits, root)
}

fn count_to_node(count: u64) -> Hash256 {
    let mut bytes = [0_u8; 32];
    bytes[0..8].copy_from_slice(&count.to_le_bytes());
    Hash256::from_slice(&bytes)
}

/// Fold the leaf count into a deposit-tree root.
pub fn mix_in_count(root: Hash256, count: u64) -> Hash256 {
    let mut preimage = [0_u8; 64];
    preimage[0..32].copy_from_slice(root.as_bytes());
    preimage[32..64].copy_from_slice(count_to_node(count).as_bytes());
    Hash256::from_slice(&hash(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::verify_merkle_proof;
    use types::PublicKeyBytes;

    fn deposit_data(i: u8, amount: u64) -> DepositData {
        let mut pubkey = [0_u8; 48];
        pubkey[0] = i;
        DepositData {
            pubkey: PublicKeyBytes::from_bytes(&pubkey).unwrap(),
            withdrawal_credentials: Hash256::repeat_byte(i),
            amount,
            signature: types::SignatureBytes::empty(),
        }
    }

    #[test]
    fn genesis_deposit_proofs_verify_incrementally(){
        let spec = ChainSpec::minimal();
        let data: Vec<DepositData> = (0..4)
            .map(|i| deposit_data(i, spec.max_effective_balance))
            .collect();
        let leaves: Vec<Hash256> = data.iter().map(|d| d.tree_hash_root()).collect();
        let (deposits, _) = genesis_deposits(data, &spec);

        for (i, deposit) in deposits.iter().enumerate() {
            let tree = MerkleTree::create(
                &leaves[0..=i],
                spec.deposit_contract_tree_depth as usize,
            );
            let root = mix_in_count(tree.root(), (i + 1) as u64);
            assert!(verify_merkle_proof(
                deposit.data.tree_hash_root(),
                &deposit.proof,
                spec.deposit_contract_tree_depth as usize + 1,
                i,
                root,
            ));
        }
    }

    #[test]
    fn genesis_state_activates_full_deposits() {
        let spec = ChainSpec::minimal();
        let data: Vec<DepositData> = (0..8)
            .map(|i| deposit_data(i, spec.max_effective_balance))
            .collect();
        let (deposits, root) = genesis_deposits(data, &spec);
        let eth1_data = Eth1Data {
            deposit_root: root,
            deposit_count: deposits.len() as u64,
            block_hash: Hash256::zero(),
        };

        let state = initialize_beacon_state_from_eth1(0, &deposits, eth1_data, &spec).unwrap();
        assert_eq!(state.validators.len(), 8);
        assert_eq!(state.eth1_deposit_index, 8);
        assert!(state
            .validators
            .iter()
            .all(|v| v.is_active_at(spec.genesis_epoch)));
    }

    #[test]
    fn genesis_state_validity_needs_enough_validators() {
        let mut spec = ChainSpec::minimal();
        spec.min_genesis_active_validator_count = 8;
        spec.min_genesis_time = 100;

        let data: Vec<DepositData> = (0..8)
            .map(|i| deposit_data(i, spec.max_effective_balance))
            .collect();
        let (deposits, root) = genesis_deposits(data, &spec);
        let eth1_data = Eth1Data {
            deposit_root: root,
            deposit_count: deposits.len() as u64,
            block_hash: Hash256::zero(),
        };

        let state = initialize_beacon_state_from_eth1(200, &deposits, eth1_data.clone(), &spec)
            .unwrap();
        assert!(is_valid_genesis_state(&state, &spec));

        // Too early.
        let early = initialize_beacon_state_from_eth1(50, &deposits, eth1_data.clone(), &spec)
            .unwrap();
        assert!(!is_valid_genesis_state(&early, &spec));

        // Too few validators.
        let thin =
            initialize_beacon_state_from_eth1(200, &deposits[0..4], eth1_data, &spec).unwrap();
        assert!(!is_valid_genesis_state(&thin, &spec));
    }

    #[test]
    fn underfunded_genesis_deposit_is_not_activated() {
        let spec = ChainSpec::minimal();
        let mut data: Vec<DepositData> = (0..3)
            .map(|i| deposit_data(i, spec.max_effective_balance))
            .collect();
        data.push(deposit_data(3, spec.min_deposit_amount));
        let (deposits, root) = genesis_deposits(data, &spec);
        let eth1_data = Eth1Data {
            deposit_root: root,
            deposit_count: deposits.len() as u64,
            block_hash: Hash256::zero(),
        };

        let state = initialize_beacon_state_from_eth1(0, &deposits, eth1_data, &spec).unwrap();
        assert_eq!(state.validators.len(), 4);
        assert!(!state.validators[3].is_active_at(spec.genesis_epoch));
    }
}
