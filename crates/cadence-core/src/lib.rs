//! cadence-core
//!
//! Storage and rules for recurring tasks and their runs.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, run, auth, config, errors）
//! - **ports**: 抽象化レイヤー（Store, Clock, IdGenerator, Authorizer, Directory, ScriptParser）
//! - **impls**: 実装（InMemoryStore, RedbStore, KvDirectory）
//! - **script**: task script の軽量 parser
//! - **options**: script からの options 抽出と検証
//! - **app**: service（TaskService, RunService, RunControlService）と migration

pub mod app;
pub mod domain;
pub mod impls;
pub mod options;
pub mod ports;
pub mod script;

pub use crate::domain::errors::{Error, ErrorKind, Result};
