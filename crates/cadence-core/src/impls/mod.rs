//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発用・テスト用の KV engine
//! - **RedbStore**: ファイルベースの KV engine（redb）
//! - **KvDirectory**: KV Store 上の organization / user / authorization

pub mod inmem_kv;
pub mod kv_directory;
pub mod redb_kv;

pub use self::inmem_kv::InMemoryStore;
pub use self::kv_directory::KvDirectory;
pub use self::redb_kv::RedbStore;
