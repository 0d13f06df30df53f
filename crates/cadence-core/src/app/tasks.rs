//! TaskService - task の作成・参照・更新・削除
//!
//! # Bucket
//! - `tasksv1`: task id → task JSON
//! - `taskIndexsv1`: org id ‖ task id → task id（org 単位の一覧用）
//!
//! # 認可
//! 書き込みの前に必ず判定します。一覧では読めない record を黙って除外します。
//! 除外は owner の補完より先に行うので、読めない record では directory を引きません。

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, warn};

use crate::app::authz::{self, task_permission};
use crate::app::service::{
    insert_task, load_task, put_task, task_not_found, KvTaskService, RUNS_BUCKET, TASKS_BUCKET,
    TASK_INDEX_BUCKET,
};
use crate::domain::auth::Action;
use crate::domain::errors::{Error, Result};
use crate::domain::ids::TaskId;
use crate::domain::task::{Task, TaskCreate, TaskFilter, TaskPage, TaskStatus, TaskUpdate};
use crate::options::TaskOptions;
use crate::ports::kv::{compound_key, Entry, Store};
use crate::ports::Context;

#[async_trait]
pub trait TaskService: Send + Sync {
    async fn create_task(&self, ctx: &Context, create: TaskCreate) -> Result<Task>;

    async fn find_task_by_id(&self, ctx: &Context, id: TaskId) -> Result<Task>;

    async fn find_tasks(&self, ctx: &Context, filter: &TaskFilter) -> Result<TaskPage>;

    async fn update_task(&self, ctx: &Context, id: TaskId, update: TaskUpdate) -> Result<Task>;

    async fn delete_task(&self, ctx: &Context, id: TaskId) -> Result<()>;
}

fn index_key(task: &Task) -> Vec<u8> {
    compound_key(&task.organization_id.encode(), &task.id.encode())
}

#[async_trait]
impl<S: Store> TaskService for KvTaskService<S> {
    async fn create_task(&self, ctx: &Context, create: TaskCreate) -> Result<Task> {
        let auth = ctx.authorizer()?;
        let org_id = create
            .organization_id
            .ok_or_else(|| Error::invalid("organization id is required"))?;
        authz::require(auth, task_permission(Action::Write, org_id, None))?;

        let org = self.directory.find_organization(org_id).await?;
        let owner_id = create
            .owner_id
            .or_else(|| auth.user_id())
            .ok_or_else(|| Error::invalid("task owner is required"))?;
        self.directory.find_user(owner_id).await?;

        let now = self.clock.now();
        let options = self.extract_options(&create.flux, now)?;
        let started = now.trunc_subsecs(0);

        let mut task = Task {
            id: self.ids.generate_task_id(),
            task_type: create.task_type,
            organization_id: org_id,
            organization: org.name,
            owner_id: Some(owner_id),
            authorization_id: None,
            name: String::new(),
            description: create.description,
            status: create.status.unwrap_or_default(),
            flux: create.flux,
            every: None,
            cron: None,
            offset: None,
            concurrency: options.concurrency,
            retry: options.retry,
            created_at: now,
            updated_at: now,
            latest_scheduled: started,
            latest_completed: started,
            latest_success: None,
            latest_failure: None,
            last_run_status: None,
            last_run_error: String::new(),
        };
        task.apply_options(&options);

        self.store.update(|tx| {
            insert_task(tx, &task)?;
            tx.bucket(TASK_INDEX_BUCKET).put(&index_key(&task), &task.id.encode())?;
            Ok(())
        })?;
        debug!(task_id = %task.id, org_id = %org_id, name = %task.name, "task created");
        Ok(task)
    }

    async fn find_task_by_id(&self, ctx: &Context, id: TaskId) -> Result<Task> {
        let mut task = self.authorized_task(ctx, id, Action::Read)?;
        self.fill_owner(&mut task).await?;
        Ok(task)
    }

    async fn find_tasks(&self, ctx: &Context, filter: &TaskFilter) -> Result<TaskPage> {
        let auth = ctx.authorizer()?;
        let limit = self.page_limit(filter.limit)?;

        // (task id bytes, task JSON) in id order, past the cursor
        let candidates: Vec<Entry> = self.store.view(|tx| match filter.organization_id {
            Some(org_id) => {
                let prefix = org_id.encode();
                let index = match filter.after {
                    Some(after) => tx
                        .bucket(TASK_INDEX_BUCKET)
                        .cursor_after(&prefix, &compound_key(&prefix, &after.encode()))?,
                    None => tx.bucket(TASK_INDEX_BUCKET).cursor(&prefix)?,
                };
                let mut found = Vec::with_capacity(index.len());
                for (_, task_key) in index {
                    if let Some(raw) = tx.bucket(TASKS_BUCKET).get(&task_key)? {
                        found.push((task_key, raw));
                    }
                }
                Ok(found)
            }
            None => match filter.after {
                Some(after) => Ok(tx.bucket(TASKS_BUCKET).cursor_after(&[], &after.encode())?),
                None => Ok(tx.bucket(TASKS_BUCKET).cursor(&[])?),
            },
        })?;

        let mut tasks = Vec::new();
        for (key, raw) in candidates {
            let mut task: Task = match serde_json::from_slice(&raw) {
                Ok(task) => task,
                Err(err) => {
                    warn!(key = ?key, error = %err, "skipping undecodable task record");
                    continue;
                }
            };
            if !authz::can_read(auth, &task) {
                continue;
            }
            self.fill_owner(&mut task).await?;
            if !filter.matches(&task) {
                continue;
            }
            tasks.push(task);
            if tasks.len() == limit {
                break;
            }
        }

        let next_after = if tasks.len() == limit {
            tasks.last().map(|task| task.id)
        } else {
            None
        };
        Ok(TaskPage { tasks, next_after })
    }

    async fn update_task(&self, ctx: &Context, id: TaskId, update: TaskUpdate) -> Result<Task> {
        if update.is_empty() {
            return Err(Error::invalid("cannot update task without content"));
        }
        let existing = self.authorized_task(ctx, id, Action::Write)?;

        let now = self.clock.now();
        let options = match &update.flux {
            Some(flux) => Some(self.extract_options(flux, now)?),
            None => None,
        };
        let owner = match existing.owner_id {
            Some(_) => None,
            None => {
                self.owners
                    .resolve(existing.organization_id, existing.authorization_id)
                    .await?
            }
        };

        let task = self.store.update(|tx| {
            let mut task = load_task(tx, id)?.ok_or_else(task_not_found)?;
            apply_update(&mut task, &update, options.as_ref(), now);
            if task.owner_id.is_none() {
                task.owner_id = owner;
            }
            put_task(tx, &task)?;
            Ok(task)
        })?;
        debug!(task_id = %task.id, status = %task.status, "task updated");
        Ok(task)
    }

    async fn delete_task(&self, ctx: &Context, id: TaskId) -> Result<()> {
        let task = self.authorized_task(ctx, id, Action::Write)?;

        let removed_runs = self.store.update(|tx| {
            if load_task(tx, id)?.is_none() {
                return Err(task_not_found());
            }
            tx.bucket(TASKS_BUCKET).delete(&id.encode())?;
            tx.bucket(TASK_INDEX_BUCKET).delete(&index_key(&task))?;

            let runs = tx.bucket(RUNS_BUCKET).cursor(&id.encode())?;
            for (key, _) in &runs {
                tx.bucket(RUNS_BUCKET).delete(key)?;
            }
            Ok(runs.len())
        })?;
        debug!(task_id = %id, removed_runs, "task deleted");
        Ok(())
    }
}

fn move_forward(current: &mut DateTime<Utc>, supplied: Option<DateTime<Utc>>) {
    if let Some(at) = supplied {
        if at > *current {
            *current = at;
        }
    }
}

fn move_forward_opt(current: &mut Option<DateTime<Utc>>, supplied: Option<DateTime<Utc>>) {
    if let Some(at) = supplied {
        if current.is_none_or(|cur| at > cur) {
            *current = Some(at);
        }
    }
}

/// Merge a patch into a stored task. `options` are the ones extracted from
/// `update.flux`, when it is set.
fn apply_update(
    task: &mut Task,
    update: &TaskUpdate,
    options: Option<&TaskOptions>,
    now: DateTime<Utc>,
) {
    if let (Some(flux), Some(options)) = (&update.flux, options) {
        task.flux = flux.clone();
        task.apply_options(options);
    }
    if let Some(description) = &update.description {
        task.description = description.clone();
    }

    let reactivated = !task.is_active() && update.status == Some(TaskStatus::Active);
    if let Some(status) = update.status {
        task.status = status;
    }
    if reactivated {
        let resumed = now.trunc_subsecs(0);
        task.latest_scheduled = update.latest_scheduled.unwrap_or(resumed);
        task.latest_completed = update.latest_completed.unwrap_or(resumed);
    } else {
        move_forward(&mut task.latest_scheduled, update.latest_scheduled);
        move_forward(&mut task.latest_completed, update.latest_completed);
    }
    move_forward_opt(&mut task.latest_success, update.latest_success);
    move_forward_opt(&mut task.latest_failure, update.latest_failure);

    if let Some(status) = update.last_run_status {
        task.last_run_status = Some(status);
    }
    if let Some(error) = &update.last_run_error {
        task.last_run_error = error.clone();
    }
    task.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::app::testing::{Fixture, RepeatingIds};
    use crate::domain::auth::{
        Authorization, MappingFilter, Organization, User, UserResourceMapping,
    };
    use crate::domain::errors::ErrorKind;
    use crate::domain::ids::{AuthorizationId, OrgId, UserId};
    use crate::ports::Directory;
    use chrono::{Duration, TimeZone};

    const HOURLY: &str = r#"option task = {name: "hourly", every: 1h}
from(bucket: "b") |> range(start: -1h)"#;

    fn stored_task() -> Task {
        let raw = r#"{"id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","orgID":"01ARZ3NDEKTSV4RRFFQ69G5FAW","status":"inactive","flux":"","latestScheduled":"2024-01-01T00:00:00Z","latestCompleted":"2024-01-01T00:00:00Z"}"#;
        serde_json::from_str(raw).unwrap()
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn reactivation_resets_latest_times() {
        let mut task = stored_task();
        let now = at(5) + Duration::milliseconds(750);
        let update = TaskUpdate {
            status: Some(TaskStatus::Active),
            ..TaskUpdate::default()
        };
        apply_update(&mut task, &update, None, now);
        assert_eq!(task.latest_scheduled, at(5));
        assert_eq!(task.latest_completed, at(5));
        assert_eq!(task.updated_at, now);
    }

    #[test]
    fn latest_times_only_move_forward() {
        let mut task = stored_task();
        task.status = TaskStatus::Active;
        let update = TaskUpdate {
            latest_scheduled: Some(at(3)),
            latest_completed: Some(at(0) - Duration::hours(1)),
            latest_success: Some(at(2)),
            ..TaskUpdate::default()
        };
        apply_update(&mut task, &update, None, at(4));
        assert_eq!(task.latest_scheduled, at(3));
        assert_eq!(task.latest_completed, at(0));
        assert_eq!(task.latest_success, Some(at(2)));

        let older = TaskUpdate {
            latest_success: Some(at(1)),
            ..TaskUpdate::default()
        };
        apply_update(&mut task, &older, None, at(4));
        assert_eq!(task.latest_success, Some(at(2)));
    }

    #[tokio::test]
    async fn create_fills_schedule_from_script() {
        let fx = Fixture::new();
        let task = fx
            .service
            .create_task(&fx.member_ctx(), TaskCreate::new(fx.org, fx.user, HOURLY))
            .await
            .unwrap();
        assert_eq!(task.name, "hourly");
        assert_eq!(task.every.as_ref().map(ToString::to_string).as_deref(), Some("1h"));
        assert_eq!(task.owner_id, Some(fx.user));
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.latest_scheduled, task.created_at.trunc_subsecs(0));
        assert_eq!(task.organization, "acme");
    }

    #[tokio::test]
    async fn owner_defaults_to_the_calling_user() {
        let fx = Fixture::new();
        let create = TaskCreate {
            organization_id: Some(fx.org),
            flux: HOURLY.into(),
            ..TaskCreate::default()
        };
        let task = fx.service.create_task(&fx.member_ctx(), create).await.unwrap();
        assert_eq!(task.owner_id, Some(fx.user));
    }

    #[tokio::test]
    async fn create_rejects_bad_options_and_unknown_org() {
        let fx = Fixture::new();
        let err = fx
            .service
            .create_task(
                &fx.member_ctx(),
                TaskCreate::new(fx.org, fx.user, r#"option task = {name: "x"}"#),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(
            err.to_string(),
            "invalid options: must specify exactly one of either cron or every"
        );

        let elsewhere = crate::domain::ids::OrgId::from_ulid(ulid::Ulid::new());
        let err = fx
            .service
            .create_task(&Context::system(), TaskCreate::new(elsewhere, fx.user, HOURLY))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "organization not found");
    }

    #[tokio::test]
    async fn empty_update_is_invalid() {
        let fx = Fixture::new();
        let task = fx.create(HOURLY).await;
        let err = fx
            .service
            .update_task(&fx.member_ctx(), task.id, TaskUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot update task without content");
    }

    #[tokio::test]
    async fn failed_script_update_leaves_task_alone() {
        let fx = Fixture::new();
        let task = fx.create(HOURLY).await;
        let update = TaskUpdate {
            flux: Some(r#"option task = {name: "x", every: 1h, cron: "* * * * *"}"#.into()),
            description: Some("changed".into()),
            ..TaskUpdate::default()
        };
        let err = fx
            .service
            .update_task(&fx.member_ctx(), task.id, update)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let stored = fx.service.find_task_by_id(&fx.member_ctx(), task.id).await.unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn paging_uses_exclusive_cursor() {
        let fx = Fixture::new();
        let mut created = Vec::new();
        for _ in 0..3 {
            created.push(fx.create(HOURLY).await.id);
        }

        let mut filter = TaskFilter::organization(fx.org);
        filter.limit = 2;
        let first = fx.service.find_tasks(&fx.member_ctx(), &filter).await.unwrap();
        assert_eq!(first.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), created[..2].to_vec());
        assert_eq!(first.next_after, Some(created[1]));

        filter.after = first.next_after;
        let second = fx.service.find_tasks(&fx.member_ctx(), &filter).await.unwrap();
        assert_eq!(second.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), created[2..].to_vec());
        assert_eq!(second.next_after, None);
    }

    #[tokio::test]
    async fn oversized_limit_is_invalid() {
        let fx = Fixture::new();
        let filter = TaskFilter {
            limit: 501,
            ..TaskFilter::default()
        };
        let err = fx.service.find_tasks(&Context::system(), &filter).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn unauthorized_write_names_the_permission() {
        let fx = Fixture::new();
        let task = fx.create(HOURLY).await;
        let err = fx
            .service
            .delete_task(&fx.stranger_ctx(), task.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            err.to_string(),
            format!("write:orgs/{}/tasks/{} is unauthorized", fx.org, task.id)
        );
    }

    #[tokio::test]
    async fn reused_task_id_conflicts() {
        let fx = Fixture::new();
        let service = fx.builder().id_generator(Arc::new(RepeatingIds::new())).build().unwrap();
        let first = service
            .create_task(&fx.member_ctx(), TaskCreate::new(fx.org, fx.user, HOURLY))
            .await
            .unwrap();

        let other = r#"option task = {name: "other", every: 5m}"#;
        let err = service
            .create_task(&fx.member_ctx(), TaskCreate::new(fx.org, fx.user, other))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "task already exists");

        let stored = service.find_task_by_id(&fx.member_ctx(), first.id).await.unwrap();
        assert_eq!(stored.name, "hourly");
    }

    /// Counts every directory call before delegating.
    struct CountingDirectory {
        inner: Arc<dyn Directory>,
        calls: AtomicUsize,
    }

    impl CountingDirectory {
        fn tick(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Directory for CountingDirectory {
        async fn find_organization(&self, id: OrgId) -> Result<Organization> {
            self.tick();
            self.inner.find_organization(id).await
        }

        async fn find_user(&self, id: UserId) -> Result<User> {
            self.tick();
            self.inner.find_user(id).await
        }

        async fn find_authorization(&self, id: AuthorizationId) -> Result<Authorization> {
            self.tick();
            self.inner.find_authorization(id).await
        }

        async fn find_resource_mappings(
            &self,
            filter: &MappingFilter,
        ) -> Result<Vec<UserResourceMapping>> {
            self.tick();
            self.inner.find_resource_mappings(filter).await
        }
    }

    #[tokio::test]
    async fn unreadable_tasks_are_skipped_before_owner_lookup() {
        let fx = Fixture::new();
        let directory = Arc::new(CountingDirectory {
            inner: fx.directory.clone(),
            calls: AtomicUsize::new(0),
        });
        let service = fx.builder().directory(directory.clone()).build().unwrap();

        // legacy record without an owner
        let mut task = stored_task();
        task.organization_id = fx.org;
        service
            .store()
            .update(|tx| {
                put_task(tx, &task)?;
                tx.bucket(TASK_INDEX_BUCKET).put(&index_key(&task), &task.id.encode())?;
                Ok(())
            })
            .unwrap();

        let filter = TaskFilter::organization(fx.org);
        let page = service.find_tasks(&fx.stranger_ctx(), &filter).await.unwrap();
        assert!(page.tasks.is_empty());
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);

        let page = service.find_tasks(&fx.member_ctx(), &filter).await.unwrap();
        assert_eq!(page.tasks.len(), 1);
        assert_eq!(page.tasks[0].owner_id, Some(fx.owner));
        assert!(directory.calls.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn cursor_applies_without_an_organization_filter() {
        let fx = Fixture::new();
        let mut created = Vec::new();
        for _ in 0..3 {
            created.push(fx.create(HOURLY).await.id);
        }

        let filter = TaskFilter {
            after: Some(created[0]),
            ..TaskFilter::default()
        };
        let page = fx.service.find_tasks(&fx.member_ctx(), &filter).await.unwrap();
        assert_eq!(page.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), created[1..].to_vec());

        let filter = TaskFilter {
            after: Some(created[2]),
            ..TaskFilter::organization(fx.org)
        };
        let page = fx.service.find_tasks(&fx.member_ctx(), &filter).await.unwrap();
        assert!(page.tasks.is_empty());
    }
}
