//! App - アプリケーション層
//!
//! ports を組み合わせて task / run の規則を実装します。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder**: service の構築とワイヤリング
//! - **KvTaskService**: `TaskService` / `RunService` / `RunControlService` の実装
//! - **OwnerResolver**: 所有者の無い古い record の所有者を決める
//! - **Migrator**: version 付き migration（owner backfill を含む）

mod authz;
pub mod builder;
pub mod migration;
pub mod owner;
pub mod runs;
pub mod service;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::{BuildError, ServiceBuilder};
pub use self::migration::{AppliedMigration, Migrator, OwnerMigration, OwnerMigrationReport};
pub use self::owner::OwnerResolver;
pub use self::runs::{RunControlService, RunService};
pub use self::service::KvTaskService;
pub use self::tasks::TaskService;
