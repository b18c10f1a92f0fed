//! `StoreItem` implementations for consensus containers.

use crate::{DBColumn, Error, StoreItem};
use ssz::{Decode, Encode};
use types::{AttestationTarget, BeaconBlock, BeaconState, LatestMessage};

macro_rules! impl_ssz_store_item {
    ($type: ty, $column: expr) => {
        impl StoreItem for $type {
            fn db_column() -> DBColumn {
                $column
            }

            fn as_store_bytes(&self) -> Vec<u8> {
                self.as_ssz_bytes()
            }

            fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error> {
                Self::from_ssz_bytes(bytes).map_err(Into::into)
            }
        }
    };
}

impl_ssz_store_item!(BeaconBlock, DBColumn::BeaconBlock);
impl_ssz_store_item!(BeaconState, DBColumn::BeaconState);
impl_ssz_store_item!(LatestMessage, DBColumn::LatestMessage);
impl_ssz_store_item!(AttestationTarget, DBColumn::AttestationTarget);
