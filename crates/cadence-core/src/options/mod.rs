//! Task options - script から取り出したスケジュール設定
//!
//! - `extract`: `option task = {...}` を探して `TaskOptions` にする
//! - `duration`: duration literal（元の綴りを保持）
//! - `cron`: cron 式の検証
//!
//! 抽出（構造の規則）と検証（値の範囲）は別の段階です。
//! service は `extract_task_options` の後に `TaskOptions::validate` を呼びます。

pub mod cron;
pub mod duration;
pub mod extract;

pub use self::duration::ScriptDuration;
pub use self::extract::{extract_task_options, ExtractionStrategy};

use chrono::{DateTime, Duration, Utc};

use crate::domain::errors::{Error, Result};

pub const DEFAULT_CONCURRENCY: i64 = 1;
pub const DEFAULT_RETRY: i64 = 1;

/// Scheduling parameters declared by a task script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub name: String,
    pub every: Option<ScriptDuration>,
    pub cron: Option<String>,
    pub offset: Option<ScriptDuration>,
    pub concurrency: i64,
    pub retry: i64,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            every: None,
            cron: None,
            offset: None,
            concurrency: DEFAULT_CONCURRENCY,
            retry: DEFAULT_RETRY,
        }
    }
}

/// Upper bounds applied by [`TaskOptions::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionLimits {
    pub max_concurrency: i64,
    pub max_retry: i64,
}

impl Default for OptionLimits {
    fn default() -> Self {
        Self {
            max_concurrency: 100,
            max_retry: 10,
        }
    }
}

impl TaskOptions {
    /// Check value ranges. Every problem found is reported in one error.
    ///
    /// Calendar durations are measured from `reference`.
    pub fn validate(&self, limits: &OptionLimits, reference: DateTime<Utc>) -> Result<()> {
        let mut problems = Vec::new();

        match (&self.cron, &self.every) {
            (Some(_), Some(_)) | (None, None) => {
                problems.push("must specify exactly one of either cron or every".to_string());
            }
            (Some(cron), None) => {
                if let Err(reason) = cron::validate_cron(cron) {
                    problems.push(format!("cron invalid: {reason}"));
                }
            }
            (None, Some(every)) => match every.length_from(reference) {
                Some(length) if length < Duration::seconds(1) => {
                    problems.push("every option must be at least 1 second".into());
                }
                Some(length) if length.subsec_nanos() != 0 => {
                    problems.push("every option must be expressible as whole seconds".into());
                }
                Some(_) => {}
                None => problems.push("every option is out of range".into()),
            },
        }

        if let Some(offset) = &self.offset {
            match offset.length_from(reference) {
                Some(length) if length.subsec_nanos() != 0 => {
                    problems.push("offset option must be expressible as whole seconds".into());
                }
                Some(_) => {}
                None => problems.push("offset option is out of range".into()),
            }
        }

        if self.concurrency < 1 {
            problems.push("concurrency option must be at least 1".into());
        } else if self.concurrency > limits.max_concurrency {
            problems.push(format!(
                "concurrency option must be at most {}",
                limits.max_concurrency
            ));
        }

        if self.retry < 1 {
            problems.push("retry option must be at least 1".into());
        } else if self.retry > limits.max_retry {
            problems.push(format!("retry option must be at most {}", limits.max_retry));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid(format!("invalid options: {}", problems.join(", "))))
        }
    }
}
