//! KvTaskService - task / run service の本体
//!
//! # 構成
//! - `store`: 全 bucket を持つ KV engine
//! - `directory`: organization / user / authorization の参照先
//! - `clock` / `ids`: 時刻と ID の供給元（テストでは固定できる）
//! - `parser` + `config`: options の抽出と検証
//!
//! `TaskService` は `tasks.rs`、`RunService` / `RunControlService` は `runs.rs`
//! で実装しています。どの操作も transaction は 1 つで、`.await` を跨ぎません。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::app::authz;
use crate::app::migration::{AppliedMigration, Migrator};
use crate::app::owner::OwnerResolver;
use crate::domain::auth::Action;
use crate::domain::config::ServiceConfig;
use crate::domain::errors::{Error, Result};
use crate::domain::ids::TaskId;
use crate::domain::task::Task;
use crate::options::{extract_task_options, TaskOptions};
use crate::ports::kv::{Store, Tx};
use crate::ports::{Clock, Context, Directory, IdGenerator, ScriptParser};

pub const TASKS_BUCKET: &str = "tasksv1";
pub const TASK_INDEX_BUCKET: &str = "taskIndexsv1";
pub const RUNS_BUCKET: &str = "task-runs";

pub struct KvTaskService<S> {
    pub(super) store: S,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) parser: Arc<dyn ScriptParser>,
    pub(super) config: ServiceConfig,
    pub(super) owners: OwnerResolver,
}

impl<S: Store> KvTaskService<S> {
    /// Apply pending migrations (bucket creation, owner backfill).
    pub async fn initialize(&self) -> Result<Vec<AppliedMigration>> {
        Migrator::new(&self.store, self.owners.clone(), Arc::clone(&self.clock))
            .up()
            .await
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(super) fn extract_options(&self, script: &str, reference: DateTime<Utc>) -> Result<TaskOptions> {
        let options = extract_task_options(
            self.parser.as_ref(),
            script,
            self.config.extraction_strategy,
        )?;
        options.validate(&self.config.option_limits(), reference)?;
        Ok(options)
    }

    /// `0` means the configured default.
    pub(super) fn page_limit(&self, requested: usize) -> Result<usize> {
        match requested {
            0 => Ok(self.config.default_page_size),
            n if n > self.config.max_page_size => Err(Error::invalid(format!(
                "limit must be between 1 and {}",
                self.config.max_page_size
            ))),
            n => Ok(n),
        }
    }

    /// Load the task and check `action` on it for the caller.
    pub(super) fn authorized_task(&self, ctx: &Context, id: TaskId, action: Action) -> Result<Task> {
        let auth = ctx.authorizer()?;
        let task = self
            .store
            .view(|tx| load_task(tx, id))?
            .ok_or_else(task_not_found)?;
        authz::require_task(auth, action, &task)?;
        Ok(task)
    }

    /// Read-time owner fallback for legacy records. Nothing is written.
    pub(super) async fn fill_owner(&self, task: &mut Task) -> Result<()> {
        if task.owner_id.is_none() {
            task.owner_id = self
                .owners
                .resolve(task.organization_id, task.authorization_id)
                .await?;
        }
        Ok(())
    }
}

pub(super) fn task_not_found() -> Error {
    Error::not_found("task not found")
}

pub(super) fn load_task(tx: &mut dyn Tx, id: TaskId) -> Result<Option<Task>> {
    match tx.bucket(TASKS_BUCKET).get(&id.encode())? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

/// Write a new task; an existing record under the same id is a conflict.
pub(super) fn insert_task(tx: &mut dyn Tx, task: &Task) -> Result<()> {
    if tx.bucket(TASKS_BUCKET).get(&task.id.encode())?.is_some() {
        return Err(Error::conflict("task already exists"));
    }
    put_task(tx, task)
}

pub(super) fn put_task(tx: &mut dyn Tx, task: &Task) -> Result<()> {
    let value = serde_json::to_vec(task)?;
    tx.bucket(TASKS_BUCKET).put(&task.id.encode(), &value)?;
    Ok(())
}
