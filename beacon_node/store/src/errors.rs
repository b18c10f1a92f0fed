use ssz::DecodeError;
use state_processing::{GenesisError, StateTransitionError};
use types::{BeaconStateError, Hash256, Slot};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    SszDecodeError(DecodeError),
    BeaconStateError(BeaconStateError),
    /// An engine-level I/O failure. Fatal to the calling operation only.
    DBError { message: String },
    /// The operation requires a block that is not stored.
    BlockNotFound(Hash256),
    /// No justified or finalized block has ever been saved.
    NoCheckpoint,
    /// The root was marked evil; the block may not re-enter the store.
    Blacklisted(Hash256),
    /// The chain has not been initialized.
    NoChainHead,
    /// State replay walked past genesis without finding a saved state.
    NoBaseState(Hash256),
    /// Replaying blocks over a saved ancestor state failed.
    BlockReplayError(StateTransitionError),
    /// Genesis state construction failed.
    GenesisError(GenesisError),
    /// A replay target below the base state's slot.
    ReplaySlotUnderflow { base: Slot, target: Slot },
    /// The operation's context was cancelled before any commit.
    Cancelled,
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Error {
        Error::SszDecodeError(e)
    }
}

impl From<BeaconStateError> for Error {
    fn from(e: BeaconStateError) -> Error {
        Error::BeaconStateError(e)
    }
}

impl From<StateTransitionError> for Error {
    fn from(e: StateTransitionError) -> Error {
        Error::BlockReplayError(e)
    }
}

impl From<GenesisError> for Error {
    fn from(e: GenesisError) -> Error {
        Error::GenesisError(e)
    }
}

impl From<DBError> for Error {
    fn from(e: DBError) -> Error {
        Error::DBError { message: e.message }
    }
}

#[derive(Debug)]
pub struct DBError {
    pub message: String,
}

impl DBError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}
