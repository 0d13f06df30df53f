//! Task - 定期実行される job の定義
//!
//! # 保存形式
//! `tasksv1` bucket に camelCase の JSON で保存します（`orgID`, `ownerID`, ...）。
//! 古い record は `ownerID` / `concurrency` / `retry` / 時刻を持たないことがあるので、
//! どれも default 付きで decode できるようにしています。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::Error;
use crate::domain::ids::{AuthorizationId, OrgId, TaskId, UserId};
use crate::domain::run::RunStatus;
use crate::options::{ScriptDuration, TaskOptions, DEFAULT_CONCURRENCY, DEFAULT_RETRY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Active,
    Inactive,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "inactive" => Ok(TaskStatus::Inactive),
            other => Err(Error::invalid(format!("invalid task status {other:?}"))),
        }
    }
}

fn default_concurrency() -> i64 {
    DEFAULT_CONCURRENCY
}

fn default_retry() -> i64 {
    DEFAULT_RETRY
}

/// `""` and `null` both decode as `None`.
pub(crate) fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// A stored task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub task_type: String,
    #[serde(rename = "orgID")]
    pub organization_id: OrgId,
    #[serde(rename = "org", default)]
    pub organization: String,
    #[serde(
        rename = "ownerID",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<UserId>,
    #[serde(
        rename = "authorizationID",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub authorization_id: Option<AuthorizationId>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub flux: String,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub every: Option<ScriptDuration>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub offset: Option<ScriptDuration>,
    #[serde(default = "default_concurrency")]
    pub concurrency: i64,
    #[serde(default = "default_retry")]
    pub retry: i64,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub latest_scheduled: DateTime<Utc>,
    #[serde(default)]
    pub latest_completed: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_success: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_failure: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_run_error: String,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    /// Copy scheduling fields from freshly extracted options.
    pub fn apply_options(&mut self, options: &TaskOptions) {
        self.name = options.name.clone();
        self.every = options.every.clone();
        self.cron = options.cron.clone();
        self.offset = options.offset.clone();
        self.concurrency = options.concurrency;
        self.retry = options.retry;
    }
}

/// Input of `create_task`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskCreate {
    pub organization_id: Option<OrgId>,
    pub owner_id: Option<UserId>,
    pub flux: String,
    pub status: Option<TaskStatus>,
    pub description: String,
    pub task_type: String,
}

impl TaskCreate {
    pub fn new(organization_id: OrgId, owner_id: UserId, flux: impl Into<String>) -> Self {
        Self {
            organization_id: Some(organization_id),
            owner_id: Some(owner_id),
            flux: flux.into(),
            ..Self::default()
        }
    }
}

/// Partial update; unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub flux: Option<String>,
    pub status: Option<TaskStatus>,
    pub description: Option<String>,
    pub latest_scheduled: Option<DateTime<Utc>>,
    pub latest_completed: Option<DateTime<Utc>>,
    pub latest_success: Option<DateTime<Utc>>,
    pub latest_failure: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub last_run_error: Option<String>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Criteria for `find_tasks`. `limit: 0` means the configured default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub organization_id: Option<OrgId>,
    pub owner_id: Option<UserId>,
    pub name: Option<String>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    /// Exclusive cursor: only tasks with a greater id are returned.
    pub after: Option<TaskId>,
    pub limit: usize,
}

impl TaskFilter {
    pub fn organization(org_id: OrgId) -> Self {
        Self {
            organization_id: Some(org_id),
            ..Self::default()
        }
    }

    /// Field criteria only; the cursor and limit are applied by the scan.
    pub fn matches(&self, task: &Task) -> bool {
        self.organization_id.is_none_or(|org| org == task.organization_id)
            && self.owner_id.is_none_or(|owner| Some(owner) == task.owner_id)
            && self.name.as_ref().is_none_or(|name| *name == task.name)
            && self.status.is_none_or(|status| status == task.status)
            && self.task_type.as_ref().is_none_or(|t| *t == task.task_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// Last id of a full page; pass it as `after` to continue.
    pub next_after: Option<TaskId>,
}
