//! Consensus types for the beacon chain.
//!
//! Containers are plain SSZ structs; identity is always a tree-hash root
//! (the signing root for blocks, the state root for states).

pub mod consts;

mod attestation;
mod attestation_data;
mod attestation_target;
mod attester_slashing;
mod beacon_block;
mod beacon_block_body;
mod beacon_block_header;
mod beacon_state;
mod bls;
mod chain_spec;
mod checkpoint;
mod deposit;
mod eth1_data;
mod fork;
mod indexed_attestation;
mod latest_message;
mod pending_attestation;
mod proposer_slashing;
mod slot_epoch;
mod validator;
mod voluntary_exit;

pub use attestation::Attestation;
pub use attestation_data::{AttestationData, AttestationDataAndCustodyBit};
pub use attestation_target::AttestationTarget;
pub use attester_slashing::AttesterSlashing;
pub use beacon_block::BeaconBlock;
pub use beacon_block_body::BeaconBlockBody;
pub use beacon_block_header::BeaconBlockHeader;
pub use beacon_state::{BeaconState, BeaconStateError};
pub use bls::{PublicKeyBytes, SignatureBytes, PUBLIC_KEY_BYTES_LEN, SIGNATURE_BYTES_LEN};
pub use chain_spec::{ChainSpec, Domain};
pub use checkpoint::Checkpoint;
pub use deposit::{Deposit, DepositData};
pub use eth1_data::Eth1Data;
pub use fork::Fork;
pub use indexed_attestation::IndexedAttestation;
pub use latest_message::LatestMessage;
pub use pending_attestation::PendingAttestation;
pub use proposer_slashing::{ProposerSlashing, SignedBeaconBlockHeader};
pub use slot_epoch::{Epoch, Slot};
pub use validator::Validator;
pub use voluntary_exit::VoluntaryExit;

pub use ethereum_types::H256 as Hash256;

/// Balance denomination used throughout consensus, 10^-9 ether.
pub type Gwei = u64;
/// Index of a committee within a slot.
pub type CommitteeIndex = u64;
