//! Run services - run の状態遷移と手動実行
//!
//! # Bucket
//! `task-runs`: task id ‖ run id → run JSON。task の prefix で scan すると run id 順。
//!
//! # 2 つの trait
//! - `RunService`: 利用者向け（参照・cancel・retry・force）
//! - `RunControlService`: scheduler / executor 向け（作成・遷移・log・完了）
//!
//! どちらも所有 task への権限で判定します（参照は read、変更は write）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::service::{load_task, put_task, task_not_found, KvTaskService, RUNS_BUCKET};
use crate::domain::auth::Action;
use crate::domain::errors::{Error, Result};
use crate::domain::ids::{RunId, TaskId};
use crate::domain::run::{LogEvent, LogFilter, Run, RunFilter, RunStatus};
use crate::domain::task::Task;
use crate::ports::kv::{compound_key, Store, Tx};
use crate::ports::Context;

#[async_trait]
pub trait RunService: Send + Sync {
    async fn find_run_by_id(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run>;

    async fn find_runs(&self, ctx: &Context, filter: &RunFilter) -> Result<Vec<Run>>;

    async fn find_logs(&self, ctx: &Context, filter: &LogFilter) -> Result<Vec<LogEvent>>;

    async fn cancel_run(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run>;

    /// Queue a manual run for the same time as a finished one.
    async fn retry_run(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run>;

    async fn force_run(
        &self,
        ctx: &Context,
        task_id: TaskId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Run>;
}

#[async_trait]
pub trait RunControlService: Send + Sync {
    async fn create_run(
        &self,
        ctx: &Context,
        task_id: TaskId,
        scheduled_for: DateTime<Utc>,
        requested_at: Option<DateTime<Utc>>,
    ) -> Result<Run>;

    async fn update_run_state(
        &self,
        ctx: &Context,
        task_id: TaskId,
        run_id: RunId,
        when: DateTime<Utc>,
        status: RunStatus,
    ) -> Result<Run>;

    async fn add_run_log(
        &self,
        ctx: &Context,
        task_id: TaskId,
        run_id: RunId,
        when: DateTime<Utc>,
        message: &str,
    ) -> Result<Run>;

    /// Record a terminal run on its task.
    async fn finish_run(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run>;

    async fn currently_running(&self, ctx: &Context, task_id: TaskId) -> Result<Vec<Run>>;

    async fn manual_runs(&self, ctx: &Context, task_id: TaskId) -> Result<Vec<Run>>;
}

fn run_key(task_id: TaskId, run_id: RunId) -> Vec<u8> {
    compound_key(&task_id.encode(), &run_id.encode())
}

fn run_not_found() -> Error {
    Error::not_found("run not found")
}

fn load_run(tx: &mut dyn Tx, task_id: TaskId, run_id: RunId) -> Result<Run> {
    match tx.bucket(RUNS_BUCKET).get(&run_key(task_id, run_id))? {
        Some(raw) => Ok(serde_json::from_slice(&raw)?),
        None => Err(run_not_found()),
    }
}

fn put_run(tx: &mut dyn Tx, run: &Run) -> Result<()> {
    let value = serde_json::to_vec(run)?;
    tx.bucket(RUNS_BUCKET).put(&run_key(run.task_id, run.id), &value)?;
    Ok(())
}

fn insert_run(tx: &mut dyn Tx, run: &Run) -> Result<()> {
    if tx.bucket(RUNS_BUCKET).get(&run_key(run.task_id, run.id))?.is_some() {
        return Err(Error::conflict("run already exists"));
    }
    put_run(tx, run)
}

/// Every run of the task, in run id order.
fn task_runs(tx: &mut dyn Tx, task_id: TaskId) -> Result<Vec<Run>> {
    let entries = tx.bucket(RUNS_BUCKET).cursor(&task_id.encode())?;
    let mut runs = Vec::with_capacity(entries.len());
    for (_, raw) in entries {
        runs.push(serde_json::from_slice(&raw)?);
    }
    Ok(runs)
}

impl<S: Store> KvTaskService<S> {
    /// Read-modify-write one run inside a single transaction.
    fn modify_run<F>(&self, task_id: TaskId, run_id: RunId, f: F) -> Result<Run>
    where
        F: FnOnce(&mut Run) -> Result<()>,
    {
        self.store.update(|tx| {
            let mut run = load_run(tx, task_id, run_id)?;
            f(&mut run)?;
            put_run(tx, &run)?;
            Ok(run)
        })
    }

    fn runs_where(&self, task_id: TaskId, keep: impl Fn(&Run) -> bool) -> Result<Vec<Run>> {
        let runs = self.store.view(|tx| task_runs(tx, task_id))?;
        Ok(runs.into_iter().filter(|run| keep(run)).collect())
    }

    fn enqueue_manual(&self, task: &Task, scheduled_for: DateTime<Utc>) -> Result<Run> {
        let mut run = Run::scheduled(self.ids.generate_run_id(), task.id, scheduled_for);
        run.manual = true;
        run.requested_at = Some(self.clock.now());

        self.store.update(|tx| {
            let queued = task_runs(tx, task.id)?
                .iter()
                .any(|r| !r.status.is_terminal() && r.scheduled_for == scheduled_for);
            if queued {
                return Err(Error::conflict("run already queued"));
            }
            insert_run(tx, &run)?;
            Ok(())
        })?;
        debug!(task_id = %task.id, run_id = %run.id, %scheduled_for, "manual run queued");
        Ok(run)
    }
}

#[async_trait]
impl<S: Store> RunService for KvTaskService<S> {
    async fn find_run_by_id(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run> {
        self.authorized_task(ctx, task_id, Action::Read)?;
        self.store.view(|tx| load_run(tx, task_id, run_id))
    }

    async fn find_runs(&self, ctx: &Context, filter: &RunFilter) -> Result<Vec<Run>> {
        self.authorized_task(ctx, filter.task_id, Action::Read)?;
        let limit = self.page_limit(filter.limit)?;
        let runs = self.runs_where(filter.task_id, |run| {
            filter.after.is_none_or(|after| run.id > after) && filter.matches(run)
        })?;
        Ok(runs.into_iter().take(limit).collect())
    }

    async fn find_logs(&self, ctx: &Context, filter: &LogFilter) -> Result<Vec<LogEvent>> {
        self.authorized_task(ctx, filter.task_id, Action::Read)?;
        let runs = match filter.run_id {
            Some(run_id) => vec![self.store.view(|tx| load_run(tx, filter.task_id, run_id))?],
            None => self.runs_where(filter.task_id, |_| true)?,
        };
        Ok(runs.into_iter().flat_map(|run| run.log).collect())
    }

    async fn cancel_run(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run> {
        self.authorized_task(ctx, task_id, Action::Write)?;
        let now = self.clock.now();
        let run = self.modify_run(task_id, run_id, |run| {
            if run.status.is_terminal() {
                return Err(Error::conflict("cannot cancel a completed run"));
            }
            run.transition(RunStatus::Canceled, now)
        })?;
        debug!(%task_id, %run_id, "run canceled");
        Ok(run)
    }

    async fn retry_run(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run> {
        let task = self.authorized_task(ctx, task_id, Action::Write)?;
        let original = self.store.view(|tx| load_run(tx, task_id, run_id))?;
        if !original.status.is_terminal() {
            return Err(Error::conflict(format!(
                "cannot retry a run that is still {}",
                original.status
            )));
        }
        self.enqueue_manual(&task, original.scheduled_for)
    }

    async fn force_run(
        &self,
        ctx: &Context,
        task_id: TaskId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Run> {
        let task = self.authorized_task(ctx, task_id, Action::Write)?;
        self.enqueue_manual(&task, scheduled_for)
    }
}

#[async_trait]
impl<S: Store> RunControlService for KvTaskService<S> {
    async fn create_run(
        &self,
        ctx: &Context,
        task_id: TaskId,
        scheduled_for: DateTime<Utc>,
        requested_at: Option<DateTime<Utc>>,
    ) -> Result<Run> {
        self.authorized_task(ctx, task_id, Action::Write)?;
        let mut run = Run::scheduled(self.ids.generate_run_id(), task_id, scheduled_for);
        run.requested_at = requested_at;

        self.store.update(|tx| {
            if load_task(tx, task_id)?.is_none() {
                return Err(task_not_found());
            }
            insert_run(tx, &run)
        })?;
        debug!(%task_id, run_id = %run.id, %scheduled_for, "run created");
        Ok(run)
    }

    async fn update_run_state(
        &self,
        ctx: &Context,
        task_id: TaskId,
        run_id: RunId,
        when: DateTime<Utc>,
        status: RunStatus,
    ) -> Result<Run> {
        self.authorized_task(ctx, task_id, Action::Write)?;
        let run = self.modify_run(task_id, run_id, |run| run.transition(status, when))?;
        debug!(%task_id, %run_id, %status, "run state updated");
        Ok(run)
    }

    async fn add_run_log(
        &self,
        ctx: &Context,
        task_id: TaskId,
        run_id: RunId,
        when: DateTime<Utc>,
        message: &str,
    ) -> Result<Run> {
        self.authorized_task(ctx, task_id, Action::Write)?;
        self.modify_run(task_id, run_id, |run| {
            run.log.push(LogEvent {
                time: when,
                message: message.to_string(),
            });
            Ok(())
        })
    }

    async fn finish_run(&self, ctx: &Context, task_id: TaskId, run_id: RunId) -> Result<Run> {
        self.authorized_task(ctx, task_id, Action::Write)?;
        let now = self.clock.now();

        let run = self.store.update(|tx| {
            let run = load_run(tx, task_id, run_id)?;
            if !run.status.is_terminal() {
                return Err(Error::conflict(format!(
                    "cannot finish a run that is still {}",
                    run.status
                )));
            }
            let mut task = load_task(tx, task_id)?.ok_or_else(task_not_found)?;
            record_outcome(&mut task, &run, now);
            put_task(tx, &task)?;
            Ok(run)
        })?;
        debug!(%task_id, %run_id, status = %run.status, "run finished");
        Ok(run)
    }

    async fn currently_running(&self, ctx: &Context, task_id: TaskId) -> Result<Vec<Run>> {
        self.authorized_task(ctx, task_id, Action::Read)?;
        self.runs_where(task_id, |run| !run.status.is_terminal())
    }

    async fn manual_runs(&self, ctx: &Context, task_id: TaskId) -> Result<Vec<Run>> {
        self.authorized_task(ctx, task_id, Action::Read)?;
        self.runs_where(task_id, |run| run.manual && run.status == RunStatus::Scheduled)
    }
}

/// Copy a terminal run's result onto its task.
fn record_outcome(task: &mut Task, run: &Run, now: DateTime<Utc>) {
    if run.scheduled_for > task.latest_completed {
        task.latest_completed = run.scheduled_for;
    }
    task.last_run_status = Some(run.status);
    task.last_run_error = match run.status {
        RunStatus::Failed => run
            .log
            .last()
            .map(|event| event.message.clone())
            .unwrap_or_default(),
        _ => String::new(),
    };

    let at = run.started_at.unwrap_or(run.scheduled_for);
    let slot = match run.status {
        RunStatus::Succeeded => Some(&mut task.latest_success),
        RunStatus::Failed => Some(&mut task.latest_failure),
        _ => None,
    };
    if let Some(slot) = slot {
        if slot.is_none_or(|prev| at > prev) {
            *slot = Some(at);
        }
    }
    task.updated_at = now;
}
