//! Ports - 抽象化レイヤー
//!
//! core が外部に求めるものを trait として定義します。
//! 実装は `impls`（KV engine, directory）と `script`（parser）にあります。

pub mod authorizer;
pub mod clock;
pub mod directory;
pub mod id_generator;
pub mod kv;
pub mod script_parser;

pub use self::authorizer::{Authorizer, Context, SystemAuthorizer};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::directory::Directory;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::kv::{Store, StoreError, Tx};
pub use self::script_parser::{ParseError, ScriptParser};
