//! InMemoryStore - 開発用・テスト用の KV engine
//!
//! # 実装詳細
//! - snapshot 全体を `Arc<Buckets>` として保持し、各 bucket も `Arc` で共有
//! - view: `Arc` を clone するだけ（lock を握ったまま `f` を実行しない）
//! - update: writer mutex で直列化 → bucket の `Arc` 表だけを copy →
//!   書き込んだ bucket だけを `Arc::make_mut` で複製 → 成功時だけ差し替え
//!
//! 失敗した update は copy を捨てるだけなので、途中の書き込みは誰にも見えません。

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, RwLock};

use crate::domain::errors::Error;
use crate::ports::kv::{Entry, Store, StoreError, Tx};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;
type Buckets = BTreeMap<String, Arc<Entries>>;

/// Copy-on-write in-memory engine.
#[derive(Default)]
pub struct InMemoryStore {
    snapshot: RwLock<Arc<Buckets>>,
    writer: Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Result<Arc<Buckets>, StoreError> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| StoreError::Storage("snapshot lock poisoned".into()))
    }
}

impl Store for InMemoryStore {
    fn view<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>,
    {
        let mut tx = ReadTx {
            buckets: self.current()?,
        };
        f(&mut tx)
    }

    fn update<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T, Error>,
    {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Storage("writer lock poisoned".into()))?;

        let mut tx = WriteTx {
            buckets: (*self.current()?).clone(),
        };
        let out = f(&mut tx)?;

        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|_| StoreError::Storage("snapshot lock poisoned".into()))?;
        *snapshot = Arc::new(tx.buckets);
        Ok(out)
    }

    fn create_bucket(&self, name: &str) -> Result<(), Error> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Storage("writer lock poisoned".into()))?;
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|_| StoreError::Storage("snapshot lock poisoned".into()))?;
        if !snapshot.contains_key(name) {
            let mut next = (**snapshot).clone();
            next.insert(name.to_string(), Arc::default());
            *snapshot = Arc::new(next);
        }
        Ok(())
    }
}

/// Entries under `prefix`, starting just past `after` when one is given.
fn scan(buckets: &Buckets, bucket: &str, prefix: &[u8], after: Option<&[u8]>) -> Vec<Entry> {
    let Some(entries) = buckets.get(bucket) else {
        return Vec::new();
    };
    let start = match after {
        Some(after) if after >= prefix => Bound::Excluded(after.to_vec()),
        _ => Bound::Included(prefix.to_vec()),
    };
    entries
        .range((start, Bound::Unbounded))
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn lookup(buckets: &Buckets, bucket: &str, key: &[u8]) -> Option<Vec<u8>> {
    buckets
        .get(bucket)
        .and_then(|entries| entries.get(key))
        .cloned()
}

struct ReadTx {
    buckets: Arc<Buckets>,
}

impl Tx for ReadTx {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(lookup(&self.buckets, bucket, key))
    }

    fn put(&mut self, _bucket: &str, _key: &[u8], _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn delete(&mut self, _bucket: &str, _key: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn cursor(&self, bucket: &str, prefix: &[u8]) -> Result<Vec<Entry>, StoreError> {
        Ok(scan(&self.buckets, bucket, prefix, None))
    }

    fn cursor_after(
        &self,
        bucket: &str,
        prefix: &[u8],
        after: &[u8],
    ) -> Result<Vec<Entry>, StoreError> {
        Ok(scan(&self.buckets, bucket, prefix, Some(after)))
    }
}

struct WriteTx {
    buckets: Buckets,
}

impl Tx for WriteTx {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(lookup(&self.buckets, bucket, key))
    }

    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let entries = self.buckets.entry(bucket.to_string()).or_default();
        Arc::make_mut(entries).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError> {
        if let Some(entries) = self.buckets.get_mut(bucket) {
            if entries.contains_key(key) {
                Arc::make_mut(entries).remove(key);
            }
        }
        Ok(())
    }

    fn cursor(&self, bucket: &str, prefix: &[u8]) -> Result<Vec<Entry>, StoreError> {
        Ok(scan(&self.buckets, bucket, prefix, None))
    }

    fn cursor_after(
        &self,
        bucket: &str,
        prefix: &[u8],
        after: &[u8],
    ) -> Result<Vec<Entry>, StoreError> {
        Ok(scan(&self.buckets, bucket, prefix, Some(after)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_update_is_visible_to_views() {
        let store = InMemoryStore::new();
        store
            .update(|tx| {
                tx.bucket("b").put(b"k", b"v")?;
                Ok(())
            })
            .unwrap();

        let got = store.view(|tx| Ok(tx.bucket("b").get(b"k")?)).unwrap();
        assert_eq!(got.as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn failed_update_rolls_back_everything() {
        let store = InMemoryStore::new();
        let result: Result<(), Error> = store.update(|tx| {
            tx.bucket("b").put(b"a", b"1")?;
            tx.bucket("b").put(b"b", b"2")?;
            Err(Error::invalid("boom"))
        });
        assert_eq!(result.unwrap_err().to_string(), "boom");

        let entries = store.view(|tx| Ok(tx.bucket("b").cursor(b"")?)).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn views_reject_writes() {
        let store = InMemoryStore::new();
        let err = store
            .view(|tx| Ok(tx.bucket("b").put(b"k", b"v")?))
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn cursor_is_prefix_scoped_and_ordered() {
        let store = InMemoryStore::new();
        store
            .update(|tx| {
                let mut b = tx.bucket("b");
                b.put(b"ab2", b"2")?;
                b.put(b"aa", b"x")?;
                b.put(b"ab1", b"1")?;
                b.put(b"ac", b"y")?;
                Ok(())
            })
            .unwrap();

        let keys: Vec<Vec<u8>> = store
            .view(|tx| Ok(tx.bucket("b").cursor(b"ab")?))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"ab1".to_vec(), b"ab2".to_vec()]);
    }

    #[test]
    fn view_keeps_its_snapshot_during_a_later_update() {
        let store = InMemoryStore::new();
        store
            .update(|tx| Ok(tx.bucket("b").put(b"k", b"old")?))
            .unwrap();

        let seen = store
            .view(|tx| {
                store.update(|w| Ok(w.bucket("b").put(b"k", b"new")?))?;
                Ok(tx.bucket("b").get(b"k")?)
            })
            .unwrap();
        assert_eq!(seen.as_deref(), Some(&b"old"[..]));
    }

    #[test]
    fn update_copies_only_the_buckets_it_writes() {
        let store = InMemoryStore::new();
        store
            .update(|tx| {
                tx.bucket("a").put(b"k", b"1")?;
                tx.bucket("b").put(b"k", b"1")?;
                Ok(())
            })
            .unwrap();
        let before = store.current().unwrap();

        store
            .update(|tx| Ok(tx.bucket("a").put(b"k", b"2")?))
            .unwrap();
        let after = store.current().unwrap();

        assert!(Arc::ptr_eq(&before["b"], &after["b"]));
        assert!(!Arc::ptr_eq(&before["a"], &after["a"]));
        assert_eq!(before["a"].get(&b"k"[..]), Some(&b"1".to_vec()));
    }

    #[test]
    fn cursor_after_starts_past_the_given_key() {
        let store = InMemoryStore::new();
        store
            .update(|tx| {
                let mut b = tx.bucket("b");
                for key in [&b"a1"[..], b"b1", b"b2", b"b3", b"c1"] {
                    b.put(key, b"")?;
                }
                Ok(())
            })
            .unwrap();

        let keys = |prefix: &[u8], after: &[u8]| -> Vec<Vec<u8>> {
            store
                .view(|tx| Ok(tx.bucket("b").cursor_after(prefix, after)?))
                .unwrap()
                .into_iter()
                .map(|(k, _)| k)
                .collect()
        };
        assert_eq!(keys(&b"b"[..], &b"b1"[..]), vec![b"b2".to_vec(), b"b3".to_vec()]);
        assert_eq!(keys(&b"b"[..], &b"a9"[..]), vec![b"b1".to_vec(), b"b2".to_vec(), b"b3".to_vec()]);
        assert_eq!(keys(&b""[..], &b"b3"[..]), vec![b"c1".to_vec()]);
        assert!(keys(&b"b"[..], &b"b3"[..]).is_empty());
    }
}
