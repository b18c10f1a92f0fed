use crate::{
    get_key_for_col, ColumnIter, DBColumn, Error, ItemStore, KeyValueStore, KeyValueStoreOp,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type DBMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// A thread-safe `BTreeMap` wrapper, used for testing.
#[derive(Default)]
pub struct MemoryStore {
    db: RwLock<DBMap>,
}

impl MemoryStore {
    /// Create a new, empty database.
    pub fn open() -> Self {
        Self {
            db: RwLock::new(BTreeMap::new()),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get_bytes(&self, col: &str, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.db.read().get(&get_key_for_col(col, key)).cloned())
    }

    fn put_bytes(&self, col: &str, key: &[u8], val: &[u8]) -> Result<(), Error> {
        self.db.write().insert(get_key_for_col(col, key), val.to_vec());
        Ok(())
    }

    fn key_exists(&self, col: &str, key: &[u8]) -> Result<bool, Error> {
        Ok(self.db.read().contains_key(&get_key_for_col(col, key)))
    }

    fn key_delete(&self, col: &str, key: &[u8]) -> Result<(), Error> {
        self.db.write().remove(&get_key_for_col(col, key));
        Ok(())
    }

    fn do_atomically(&self, batch: Vec<KeyValueStoreOp>) -> Result<(), Error> {
        let mut db = self.db.write();
        for op in batch {
            match op {
                KeyValueStoreOp::PutKeyValue(key, value) => {
                    db.insert(key, value);
                }
                KeyValueStoreOp::DeleteKey(key) => {
                    db.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter_column(&self, column: DBColumn) -> ColumnIter {
        let prefix = column.as_bytes().to_vec();
        // Collect under the lock; the guard cannot outlive the call.
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = self
            .db
            .read()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k[prefix.len()..].to_vec(), v.clone()))
            .collect();
        Box::new(pairs.into_iter().map(Ok))
    }
}

impl ItemStore for MemoryStore {}
