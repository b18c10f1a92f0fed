//! Storage for the beacon node.
//!
//! Two `KeyValueStore` engines back the typed layer:
//!
//! - `LevelDB`: the on-disk store used in production.
//! - `MemoryStore`: a `BTreeMap` store used for testing.
//!
//! `ChainDB` sits on top and owns the chain's logical namespaces: blocks,
//! states, checkpoint states, latest messages, the canonical index and the
//! evil-block deny list.

mod chain_db;
mod context;
pub mod errors;
mod impls;
mod leveldb_store;
mod memory_store;
pub mod metrics;

pub use chain_db::ChainDB;
pub use context::Context;
pub use errors::{DBError, Error};
pub use leveldb_store::LevelDB;
pub use memory_store::MemoryStore;

/// An iterator over raw `(key, value)` pairs of one column.
pub type ColumnIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), Error>> + 'a>;

pub fn get_key_for_col(column: &str, key: &[u8]) -> Vec<u8> {
    let mut result = column.as_bytes().to_vec();
    result.extend_from_slice(key);
    result
}

/// Reified storage operation, for atomic batches.
pub enum KeyValueStoreOp {
    PutKeyValue(Vec<u8>, Vec<u8>),
    DeleteKey(Vec<u8>),
}

pub trait KeyValueStore: Sync + Send + Sized + 'static {
    /// Retrieve some bytes in `column` with `key`.
    fn get_bytes(&self, column: &str, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Store some `value` in `column`, indexed with `key`.
    fn put_bytes(&self, column: &str, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Return `true` if `key` exists in `column`.
    fn key_exists(&self, column: &str, key: &[u8]) -> Result<bool, Error>;

    /// Removes `key` from `column`.
    fn key_delete(&self, column: &str, key: &[u8]) -> Result<(), Error>;

    /// Execute either all of the operations in `batch` or none at all.
    fn do_atomically(&self, batch: Vec<KeyValueStoreOp>) -> Result<(), Error>;

    /// Iterate all keys and values in `column`, in key order.
    fn iter_column(&self, column: DBColumn) -> ColumnIter;
}

/// A unique column identifier, doubling as the on-disk key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DBColumn {
    /// Singletons: head, justified/finalized blocks and states, highest slot.
    BeaconMeta,
    BeaconBlock,
    /// Post-states keyed by block signing root.
    BeaconState,
    /// States advanced to checkpoint epoch boundaries, keyed by checkpoint.
    CheckpointState,
    /// Per-validator latest attestation targets.
    LatestMessage,
    AttestationTarget,
    /// slot -> canonical block root.
    CanonicalIndex,
    /// slot -> all block roots seen at that slot.
    SlotIndex,
    /// Roots of blocks that irrecoverably failed processing.
    EvilBlock,
    /// pubkey -> validator index.
    ValidatorIndex,
}

impl From<DBColumn> for &'static str {
    /// The `&str` prefix added to keys before they hit the engine.
    fn from(column: DBColumn) -> &'static str {
        match column {
            DBColumn::BeaconMeta => "bma",
            DBColumn::BeaconBlock => "blk",
            DBColumn::BeaconState => "ste",
            DBColumn::CheckpointState => "cps",
            DBColumn::LatestMessage => "lmg",
            DBColumn::AttestationTarget => "att",
            DBColumn::CanonicalIndex => "cbr",
            DBColumn::SlotIndex => "bsi",
            DBColumn::EvilBlock => "evl",
            DBColumn::ValidatorIndex => "vix",
        }
    }
}

impl DBColumn {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

/// An item that may be stored by serializing to bytes.
pub trait StoreItem: Sized {
    /// Identifies which column this item belongs in.
    fn db_column() -> DBColumn;

    fn as_store_bytes(&self) -> Vec<u8>;

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error>;
}

/// Typed get/put/exists/delete over a `KeyValueStore`.
pub trait ItemStore: KeyValueStore {
    fn put<I: StoreItem>(&self, key: &[u8], item: &I) -> Result<(), Error> {
        self.put_bytes(I::db_column().into(), key, &item.as_store_bytes())
    }

    fn get<I: StoreItem>(&self, key: &[u8]) -> Result<Option<I>, Error> {
        match self.get_bytes(I::db_column().into(), key)? {
            Some(bytes) => Ok(Some(I::from_store_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn exists<I: StoreItem>(&self, key: &[u8]) -> Result<bool, Error> {
        self.key_exists(I::db_column().into(), key)
    }

    fn delete<I: StoreItem>(&self, key: &[u8]) -> Result<(), Error> {
        self.key_delete(I::db_column().into(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssz::{Decode, Encode};
    use tempfile::tempdir;

    #[derive(PartialEq, Debug)]
    struct StorableThing {
        a: u64,
        b: u64,
    }

    impl Encode for StorableThing {
        fn is_ssz_fixed_len() -> bool {
            true
        }
        fn ssz_fixed_len() -> usize {
            16
        }
        fn ssz_bytes_len(&self) -> usize {
            16
        }
        fn ssz_append(&self, buf: &mut Vec<u8>) {
            self.a.ssz_append(buf);
            self.b.ssz_append(buf);
        }
    }

    impl Decode for StorableThing {
        fn is_ssz_fixed_len() -> bool {
            true
        }
        fn ssz_fixed_len() -> usize {
            16
        }
        fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, ssz::DecodeError> {
            Ok(Self {
                a: u64::from_ssz_bytes(&bytes[0..8])?,
                b: u64::from_ssz_bytes(&bytes[8..16])?,
            })
        }
    }

    impl StoreItem for StorableThing {
        fn db_column() -> DBColumn {
            DBColumn::BeaconMeta
        }

        fn as_store_bytes(&self) -> Vec<u8> {
            self.as_ssz_bytes()
        }

        fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error> {
            Self::from_ssz_bytes(bytes).map_err(Into::into)
        }
    }

    fn test_impl(store: impl ItemStore) {
        let key = [0xbe_u8; 32];
        let item = StorableThing { a: 1, b: 42 };

        assert!(!store.exists::<StorableThing>(&key).unwrap());

        store.put(&key, &item).unwrap();
        assert!(store.exists::<StorableThing>(&key).unwrap());
        assert_eq!(store.get::<StorableThing>(&key).unwrap().unwrap(), item);

        store.delete::<StorableThing>(&key).unwrap();
        assert!(!store.exists::<StorableThing>(&key).unwrap());
        assert_eq!(store.get::<StorableThing>(&key).unwrap(), None);
    }

    #[test]
    fn diskdb() {
        let dir = tempdir().unwrap();
        let store = LevelDB::open(dir.path()).unwrap();
        test_impl(store);
    }

    #[test]
    fn memorydb() {
        test_impl(MemoryStore::open());
    }

    #[test]
    fn atomic_batch_applies_all() {
        let store = MemoryStore::open();
        let batch = vec![
            KeyValueStoreOp::PutKeyValue(get_key_for_col("bma", b"one"), vec![1]),
            KeyValueStoreOp::PutKeyValue(get_key_for_col("bma", b"two"), vec![2]),
            KeyValueStoreOp::DeleteKey(get_key_for_col("bma", b"missing")),
        ];
        store.do_atomically(batch).unwrap();
        assert_eq!(store.get_bytes("bma", b"one").unwrap(), Some(vec![1]));
        assert_eq!(store.get_bytes("bma", b"two").unwrap(), Some(vec![2]));
    }
}
