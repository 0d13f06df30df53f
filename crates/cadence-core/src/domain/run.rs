//! Run - task の 1 回分の実行
//!
//! # 状態遷移
//! ```text
//! scheduled ──▶ started ──▶ success
//!     │            │    └──▶ failed
//!     └────────────┴──────▶ canceled
//! ```
//! success / failed / canceled は終端で、そこからの遷移はありません。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::Error;
use crate::domain::ids::{RunId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Scheduled,
    Started,
    #[serde(rename = "success", alias = "succeeded")]
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Scheduled => "scheduled",
            RunStatus::Started => "started",
            RunStatus::Succeeded => "success",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Scheduled, Started)
                | (Scheduled, Canceled)
                | (Started, Succeeded)
                | (Started, Failed)
                | (Started, Canceled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunStatus::Scheduled),
            "started" => Ok(RunStatus::Started),
            "success" | "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "canceled" => Ok(RunStatus::Canceled),
            other => Err(Error::invalid(format!("invalid run status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    pub status: RunStatus,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log: Vec<LogEvent>,
    /// Created by force / retry rather than by the scheduler.
    #[serde(default)]
    pub manual: bool,
}

impl Run {
    pub fn scheduled(id: RunId, task_id: TaskId, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id,
            task_id,
            status: RunStatus::Scheduled,
            scheduled_for,
            requested_at: None,
            started_at: None,
            finished_at: None,
            log: Vec::new(),
            manual: false,
        }
    }

    /// Move to `next`, stamping start / finish times.
    pub fn transition(&mut self, next: RunStatus, when: DateTime<Utc>) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(Error::conflict(format!(
                "invalid run state transition: {} -> {next}",
                self.status
            )));
        }
        self.status = next;
        if next == RunStatus::Started {
            self.started_at = Some(when);
        }
        if next.is_terminal() {
            self.finished_at = Some(when);
        }
        Ok(())
    }
}

/// Criteria for `find_runs`; ordered by run id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    pub task_id: TaskId,
    pub after: Option<RunId>,
    pub limit: usize,
    /// Inclusive lower bound on `scheduled_for`.
    pub after_time: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `scheduled_for`.
    pub before_time: Option<DateTime<Utc>>,
}

impl RunFilter {
    pub fn task(task_id: TaskId) -> Self {
        Self {
            task_id,
            after: None,
            limit: 0,
            after_time: None,
            before_time: None,
        }
    }

    pub fn matches(&self, run: &Run) -> bool {
        self.after_time.is_none_or(|t| run.scheduled_for >= t)
            && self.before_time.is_none_or(|t| run.scheduled_for < t)
    }
}

/// Logs of one run, or of every run of the task when `run_id` is unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub task_id: TaskId,
    pub run_id: Option<RunId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use RunStatus::*;

    #[rstest]
    #[case(Scheduled, Started, true)]
    #[case(Scheduled, Canceled, true)]
    #[case(Started, Succeeded, true)]
    #[case(Started, Failed, true)]
    #[case(Started, Canceled, true)]
    #[case(Scheduled, Succeeded, false)]
    #[case(Scheduled, Failed, false)]
    #[case(Started, Scheduled, false)]
    #[case(Succeeded, Canceled, false)]
    #[case(Failed, Started, false)]
    #[case(Canceled, Scheduled, false)]
    fn transitions(#[case] from: RunStatus, #[case] to: RunStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn success_has_two_spellings() {
        let a: RunStatus = serde_json::from_str("\"success\"").unwrap();
        let b: RunStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(a, Succeeded);
        assert_eq!(b, Succeeded);
        assert_eq!(serde_json::to_string(&Succeeded).unwrap(), "\"success\"");
    }

    #[test]
    fn transition_stamps_times() {
        let at = Utc::now();
        let mut run = Run::scheduled(RunId::from_ulid(ulid::Ulid::new()), TaskId::from_ulid(ulid::Ulid::new()), at);
        run.transition(Started, at).unwrap();
        assert_eq!(run.started_at, Some(at));
        run.transition(Failed, at).unwrap();
        assert_eq!(run.finished_at, Some(at));

        let err = run.transition(Canceled, at).unwrap_err();
        assert_eq!(err.to_string(), "invalid run state transition: failed -> canceled");
    }
}
