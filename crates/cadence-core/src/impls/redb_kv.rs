//! RedbStore - ファイルベースの KV engine（redb）
//!
//! bucket 1 つにつき redb の table 1 つ。key / value はどちらも bytes。
//! read transaction で存在しない table は空の bucket として扱います。

use std::fmt::Display;
use std::ops::Bound;
use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction};
use tracing::debug;

use crate::domain::errors::Error;
use crate::ports::kv::{Entry, Store, StoreError, Tx};

type Table<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

fn table(name: &str) -> Table<'_> {
    TableDefinition::new(name)
}

fn storage(err: impl Display) -> StoreError {
    StoreError::Storage(err.to_string())
}

/// KV engine backed by a single redb database file.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let db = Database::create(path).map_err(storage)?;
        debug!(?path, "opened redb store");
        Ok(Self { db })
    }
}

impl Store for RedbStore {
    fn view<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>,
    {
        let txn = self.db.begin_read().map_err(storage)?;
        let mut tx = RedbReadTx { txn };
        f(&mut tx)
    }

    fn update<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>,
    {
        let txn = self.db.begin_write().map_err(storage)?;
        let mut tx = RedbWriteTx { txn };
        match f(&mut tx) {
            Ok(out) => {
                tx.txn.commit().map_err(storage)?;
                Ok(out)
            }
            Err(err) => {
                if let Err(abort) = tx.txn.abort() {
                    debug!(error = %abort, "abort after failed update");
                }
                Err(err)
            }
        }
    }

    fn create_bucket(&self, name: &str) -> Result<(), Error> {
        let txn = self.db.begin_write().map_err(storage)?;
        {
            txn.open_table(table(name)).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }
}

struct RedbReadTx {
    txn: ReadTransaction,
}

impl Tx for RedbReadTx {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let t = match self.txn.open_table(table(bucket)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(storage(e)),
        };
        Ok(t.get(key).map_err(storage)?.map(|v| v.value().to_vec()))
    }

    fn put(&mut self, _bucket: &str, _key: &[u8], _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn delete(&mut self, _bucket: &str, _key: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn cursor(&self, bucket: &str, prefix: &[u8]) -> Result<Vec<Entry>, StoreError> {
        let t = match self.txn.open_table(table(bucket)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(storage(e)),
        };
        collect_prefix(&t, prefix, None)
    }

    fn cursor_after(
        &self,
        bucket: &str,
        prefix: &[u8],
        after: &[u8],
    ) -> Result<Vec<Entry>, StoreError> {
        let t = match self.txn.open_table(table(bucket)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(storage(e)),
        };
        collect_prefix(&t, prefix, Some(after))
    }
}

struct RedbWriteTx {
    txn: WriteTransaction,
}

impl Tx for RedbWriteTx {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let t = self.txn.open_table(table(bucket)).map_err(storage)?;
        Ok(t.get(key).map_err(storage)?.map(|v| v.value().to_vec()))
    }

    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut t = self.txn.open_table(table(bucket)).map_err(storage)?;
        t.insert(key, value).map_err(storage)?;
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError> {
        let mut t = self.txn.open_table(table(bucket)).map_err(storage)?;
        t.remove(key).map_err(storage)?;
        Ok(())
    }

    fn cursor(&self, bucket: &str, prefix: &[u8]) -> Result<Vec<Entry>, StoreError> {
        let t = self.txn.open_table(table(bucket)).map_err(storage)?;
        collect_prefix(&t, prefix, None)
    }

    fn cursor_after(
        &self,
        bucket: &str,
        prefix: &[u8],
        after: &[u8],
    ) -> Result<Vec<Entry>, StoreError> {
        let t = self.txn.open_table(table(bucket)).map_err(storage)?;
        collect_prefix(&t, prefix, Some(after))
    }
}

fn collect_prefix<T>(t: &T, prefix: &[u8], after: Option<&[u8]>) -> Result<Vec<Entry>, StoreError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let start = match after {
        Some(after) if after >= prefix => Bound::Excluded(after),
        _ => Bound::Included(prefix),
    };
    let mut results = Vec::new();
    for entry in t.range::<&[u8]>((start, Bound::Unbounded)).map_err(storage)? {
        let (key, value) = entry.map_err(storage)?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        results.push((key.to_vec(), value.value().to_vec()));
    }
    Ok(results)
}
