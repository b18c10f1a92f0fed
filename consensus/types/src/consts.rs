//! Compile-time SSZ list bounds.
//!
//! Runtime geometry (slots per epoch, ring lengths, committee sizes) lives in
//! `ChainSpec`; the type-level constants here only bound the SSZ containers.

pub use ssz_types::typenum::{
    U1, U1024, U1099511627776, U128, U16, U2048, U4, U65536, U8192,
};

pub type MaxValidatorsPerCommittee = U2048;
pub type ValidatorRegistryLimit = U1099511627776;
pub type SlotsPerHistoricalRootBound = U8192;
pub type EpochsPerHistoricalVectorBound = U65536;
pub type EpochsPerSlashingsVectorBound = U8192;
pub type Eth1DataVotesBound = U1024;
pub type PendingAttestationsBound = U8192;
pub type JustificationBitsLength = U4;

pub type MaxProposerSlashings = U16;
pub type MaxAttesterSlashings = U1;
pub type MaxAttestations = U128;
pub type MaxDeposits = U16;
pub type MaxVoluntaryExits = U16;
