//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! すべての ID は ULID (128-bit) を Phantom type でラップしたものです。
//!
//! - **固定長**: ストレージのキーは 16 byte の big-endian 表現
//! - **時刻でソート可能**: キー順 = 生成順なので、bucket の scan が ID 順になる
//! - **JSON**: 26 文字の canonical 文字列
//!
//! `TaskId` と `RunId` はコンパイル時に区別されるので、混同できません。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Width of an encoded identifier in storage keys.
pub const ENCODED_LEN: usize = 16;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// エラーメッセージで使う名前（例: "task", "run"）
    fn kind() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しません。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// ストレージキー用の固定長 big-endian 表現
    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        self.ulid.to_bytes()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ulid.fmt(f)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self::from_ulid)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.ulid)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|e| {
            serde::de::Error::custom(format!("invalid {} id {raw:?}: {e}", T::kind()))
        })
    }
}

// ========================================
// マーカー型の定義
// ========================================

macro_rules! id_marker {
    ($(#[$doc:meta])* $marker:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn kind() -> &'static str {
                $kind
            }
        }
    };
}

id_marker!(
    /// Task のマーカー型
    Task,
    "task"
);
id_marker!(
    /// Run のマーカー型
    Run,
    "run"
);
id_marker!(
    /// Organization のマーカー型
    Org,
    "organization"
);
id_marker!(
    /// User のマーカー型
    User,
    "user"
);
id_marker!(
    /// Authorization のマーカー型
    Authorization,
    "authorization"
);

/// Identifier of a recurring task definition.
pub type TaskId = Id<Task>;

/// Identifier of one execution of a task (unique within the task).
pub type RunId = Id<Run>;

/// Identifier of an organization (tenant).
pub type OrgId = Id<Org>;

/// Identifier of a user.
pub type UserId = Id<User>;

/// Identifier of an authorization (API credential).
pub type AuthorizationId = Id<Authorization>;
