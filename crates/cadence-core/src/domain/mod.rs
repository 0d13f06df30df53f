//! Domain model (IDs, tasks, runs, authorization records, config, errors).

pub mod auth;
pub mod config;
pub mod errors;
pub mod ids;
pub mod run;
pub mod task;

pub use self::config::ServiceConfig;
pub use self::errors::{Error, ErrorKind};
pub use self::ids::{AuthorizationId, OrgId, RunId, TaskId, UserId};
pub use self::run::{LogEvent, LogFilter, Run, RunFilter, RunStatus};
pub use self::task::{Task, TaskCreate, TaskFilter, TaskPage, TaskStatus, TaskUpdate};
