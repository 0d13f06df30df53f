//! KV Store port - トランザクショナルな key-value ストアの抽象化
//!
//! core が前提にしてよいのはこのモジュールの意味論だけです。
//!
//! - `view(f)`: read-only transaction。一貫した snapshot を読む
//! - `update(f)`: read-write transaction。`f` が `Ok` を返したときだけ commit
//! - `f` がエラーを返したら全体を rollback（部分的な書き込みは見えない）
//! - 同じデータへの update は engine 側で直列化される
//!
//! # 実装
//! - `impls::InMemoryStore`: テスト・開発用
//! - `impls::RedbStore`: ファイルベース（redb）

use thiserror::Error;

use crate::domain::errors::Error;

/// Failures raised by a storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write attempted in a read-only transaction")]
    ReadOnly,

    #[error("{0}")]
    Storage(String),
}

/// One key/value pair returned by a cursor.
pub type Entry = (Vec<u8>, Vec<u8>);

/// Operations available inside a transaction.
///
/// Buckets are addressed by name; `dyn Tx` also offers [`bucket`](Self::bucket)
/// for a handle scoped to one name.
pub trait Tx {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    /// An empty prefix scans the whole bucket.
    fn cursor(&self, bucket: &str, prefix: &[u8]) -> Result<Vec<Entry>, StoreError>;

    /// Like [`cursor`](Self::cursor), but only keys strictly greater than `after`.
    fn cursor_after(
        &self,
        bucket: &str,
        prefix: &[u8],
        after: &[u8],
    ) -> Result<Vec<Entry>, StoreError>;
}

impl<'t> dyn Tx + 't {
    /// Handle on one bucket inside this transaction.
    pub fn bucket<'a>(&'a mut self, name: &'a str) -> Bucket<'a, 't> {
        Bucket { tx: self, name }
    }
}

/// A bucket handle borrowed from a transaction.
pub struct Bucket<'a, 't> {
    tx: &'a mut (dyn Tx + 't),
    name: &'a str,
}

impl Bucket<'_, '_> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.tx.get(self.name, key)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tx.put(self.name, key, value)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.tx.delete(self.name, key)
    }

    pub fn cursor(&self, prefix: &[u8]) -> Result<Vec<Entry>, StoreError> {
        self.tx.cursor(self.name, prefix)
    }

    pub fn cursor_after(&self, prefix: &[u8], after: &[u8]) -> Result<Vec<Entry>, StoreError> {
        self.tx.cursor_after(self.name, prefix, after)
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

/// Store はトランザクションを提供する engine
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の呼び出し元から同時に使える）
/// - transaction を `.await` を跨いで保持しないこと
pub trait Store: Send + Sync {
    /// Run `f` inside a read-only transaction.
    fn view<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>;

    /// Run `f` inside a read-write transaction; commit iff `f` succeeds.
    fn update<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>;

    /// Make sure `name` exists so later views can read it.
    fn create_bucket(&self, name: &str) -> Result<(), Error>;
}

impl<S: Store> Store for std::sync::Arc<S> {
    fn view<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>,
    {
        (**self).view(f)
    }

    fn update<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>,
    {
        (**self).update(f)
    }

    fn create_bucket(&self, name: &str) -> Result<(), Error> {
        (**self).create_bucket(name)
    }
}

/// Concatenate two encoded keys (e.g. task id ‖ run id).
pub fn compound_key(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}
