//! Permission checks shared by the task and run services.

use crate::domain::auth::{Action, Permission, Resource};
use crate::domain::errors::{Error, Result};
use crate::domain::ids::{OrgId, TaskId};
use crate::domain::task::Task;
use crate::ports::Authorizer;

pub(crate) fn task_permission(action: Action, org_id: OrgId, task_id: Option<TaskId>) -> Permission {
    Permission::new(action, Resource::tasks(org_id, task_id))
}

/// `Unauthorized` naming the refused permission unless `auth` allows it.
pub(crate) fn require(auth: &dyn Authorizer, permission: Permission) -> Result<()> {
    if auth.allowed(&permission) {
        Ok(())
    } else {
        Err(Error::unauthorized(format!("{permission} is unauthorized")))
    }
}

pub(crate) fn require_task(auth: &dyn Authorizer, action: Action, task: &Task) -> Result<()> {
    require(auth, task_permission(action, task.organization_id, Some(task.id)))
}

pub(crate) fn can_read(auth: &dyn Authorizer, task: &Task) -> bool {
    auth.allowed(&task_permission(Action::Read, task.organization_id, Some(task.id)))
}
