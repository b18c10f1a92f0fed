use crate::metrics;
use crate::{
    get_key_for_col, ColumnIter, DBColumn, Error, ItemStore, KeyValueStore, KeyValueStoreOp,
};
use db_key::Key;
use leveldb::database::batch::{Batch, Writebatch};
use leveldb::database::kv::KV;
use leveldb::database::Database;
use leveldb::error::Error as LevelDBError;
use leveldb::iterator::{Iterable, LevelDBIterator};
use leveldb::options::{Options, ReadOptions, WriteOptions};
use std::path::Path;

/// A wrapped leveldb database.
pub struct LevelDB {
    db: Database<BytesKey>,
}

impl LevelDB {
    /// Open a database at `path`, creating a new database if one does not
    /// already exist.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut options = Options::new();
        options.create_if_missing = true;

        let db = Database::open(path, options)?;
        Ok(Self { db })
    }

    fn read_options(&self) -> ReadOptions<BytesKey> {
        ReadOptions::new()
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions::new()
    }
}

impl KeyValueStore for LevelDB {
    fn get_bytes(&self, col: &str, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        metrics::inc_counter(&metrics::DISK_DB_READ_COUNT);
        self.db
            .get(self.read_options(), BytesKey::from_vec(get_key_for_col(col, key)))
            .map_err(Into::into)
    }

    fn put_bytes(&self, col: &str, key: &[u8], val: &[u8]) -> Result<(), Error> {
        metrics::inc_counter(&metrics::DISK_DB_WRITE_COUNT);
        self.db
            .put(
                self.write_options(),
                BytesKey::from_vec(get_key_for_col(col, key)),
                val,
            )
            .map_err(Into::into)
    }

    fn key_exists(&self, col: &str, key: &[u8]) -> Result<bool, Error> {
        self.get_bytes(col, key).map(|val| val.is_some())
    }

    fn key_delete(&self, col: &str, key: &[u8]) -> Result<(), Error> {
        metrics::inc_counter(&metrics::DISK_DB_DELETE_COUNT);
        self.db
            .delete(
                self.write_options(),
                BytesKey::from_vec(get_key_for_col(col, key)),
            )
            .map_err(Into::into)
    }

    fn do_atomically(&self, batch: Vec<KeyValueStoreOp>) -> Result<(), Error> {
        let mut leveldb_batch = Writebatch::new();
        for op in batch {
            match op {
                KeyValueStoreOp::PutKeyValue(key, value) => {
                    leveldb_batch.put(BytesKey::from_vec(key), &value);
                }
                KeyValueStoreOp::DeleteKey(key) => {
                    leveldb_batch.delete(BytesKey::from_vec(key));
                }
            }
        }
        self.db
            .write(self.write_options(), &leveldb_batch)
            .map_err(Into::into)
    }

    fn iter_column(&self, column: DBColumn) -> ColumnIter {
        let start_key = BytesKey::from_vec(column.as_bytes().to_vec());
        let iter = self.db.iter(self.read_options());
        iter.seek(&start_key);

        Box::new(
            iter.take_while(move |(key, _)| key.matches_column(column))
                .map(move |(key, value)| Ok((key.remove_column(column), value))),
        )
    }
}

impl ItemStore for LevelDB {}

/// Used for keying leveldb.
#[derive(Debug, PartialEq)]
pub struct BytesKey {
    key: Vec<u8>,
}

impl Key for BytesKey {
    fn from_u8(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    fn as_slice<T, F: Fn(&[u8]) -> T>(&self, f: F) -> T {
        f(self.key.as_slice())
    }
}

impl BytesKey {
    pub fn from_vec(key: Vec<u8>) -> Self {
        Self { key }
    }

    /// `true` iff this key was created with the given `column`.
    pub fn matches_column(&self, column: DBColumn) -> bool {
        self.key.starts_with(column.as_bytes())
    }

    /// Strip the column prefix.
    pub fn remove_column(&self, column: DBColumn) -> Vec<u8> {
        self.key[column.as_bytes().len()..].to_vec()
    }
}

impl From<LevelDBError> for Error {
    fn from(e: LevelDBError) -> Error {
        Error::DBError {
            message: format!("{:?}", e),
        }
    }
}
