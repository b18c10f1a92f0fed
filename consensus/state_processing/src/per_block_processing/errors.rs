use crate::common::{CommitteeError, SignatureError};
use types::{BeaconStateError, Epoch, Hash256, Slot};

/// A failure while applying a block to a state.
///
/// `Invalid` means the block broke a consensus rule; the remaining variants
/// are internal faults.
#[derive(Debug, PartialEq, Clone)]
pub enum BlockProcessingError {
    Invalid(BlockInvalid),
    BeaconStateError(BeaconStateError),
    CommitteeError(CommitteeError),
    SignatureError(SignatureError),
}

/// Consensus-rule violations attributable to the block itself.
#[derive(Debug, PartialEq, Clone)]
pub enum BlockInvalid {
    StateSlotMismatch { state: Slot, block: Slot },
    ParentBlockRootMismatch { state: Hash256, block: Hash256 },
    ProposerSlashed(u64),
    BadRandaoSignature,
    ProposerSlashingInvalid { index: u64, reason: String },
    AttesterSlashingInvalid(String),
    IndexedAttestationInvalid(String),
    AttestationInvalid { index: usize, reason: AttestationInvalid },
    DepositProofInvalid { index: u64 },
    DepositCountMismatch { expected: u64, found: u64 },
    ExitInvalid { index: u64, reason: String },
}

#[derive(Debug, PartialEq, Clone)]
pub enum AttestationInvalid {
    /// The target epoch is neither the current nor previous epoch.
    WrongEpoch { target: Epoch, current: Epoch },
    /// The source checkpoint does not match the state's justified checkpoint
    /// for the attested epoch.
    WrongJustifiedCheckpoint,
    /// Included before the minimum delay or after the epoch window.
    IncludedOutOfWindow { attestation_slot: Slot, state_slot: Slot },
    BadCommitteeIndex,
    BadIndexedAttestation(String),
    BadSignature,
}

impl From<BeaconStateError> for BlockProcessingError {
    fn from(e: BeaconStateError) -> Self {
        BlockProcessingError::BeaconStateError(e)
    }
}

impl From<CommitteeError> for BlockProcessingError {
    fn from(e: CommitteeError) -> Self {
        BlockProcessingError::CommitteeError(e)
    }
}

impl From<SignatureError> for BlockProcessingError {
    fn from(e: SignatureError) -> Self {
        BlockProcessingError::SignatureError(e)
    }
}

impl From<BlockInvalid> for BlockProcessingError {
    fn from(e: BlockInvalid) -> Self {
        BlockProcessingError::Invalid(e)
    }
}
