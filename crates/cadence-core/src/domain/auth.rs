//! Authorization model: permissions, directory records and ownership mappings.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::domain::ids::{AuthorizationId, OrgId, TaskId, UserId};

/// What a permission lets you do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of resources a permission can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Tasks,
    Orgs,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Tasks => "tasks",
            ResourceType::Orgs => "orgs",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource, optionally narrowed to one organization and one id.
///
/// `org_id: None` means every organization, `id: None` means every
/// resource of `kind` in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    #[serde(rename = "orgID", default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Ulid>,
}

impl Resource {
    /// Every task of one organization, or one task when `id` is given.
    pub fn tasks(org_id: OrgId, id: Option<TaskId>) -> Self {
        Self {
            kind: ResourceType::Tasks,
            org_id: Some(org_id),
            id: id.map(|id| id.as_ulid()),
        }
    }

    pub fn org(org_id: OrgId) -> Self {
        Self {
            kind: ResourceType::Orgs,
            org_id: None,
            id: Some(org_id.as_ulid()),
        }
    }

    fn covers(&self, other: &Resource) -> bool {
        self.kind == other.kind
            && self.org_id.is_none_or(|org| other.org_id == Some(org))
            && self.id.is_none_or(|id| other.id == Some(id))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(org) = self.org_id {
            write!(f, "orgs/{org}/")?;
        }
        f.write_str(self.kind.as_str())?;
        if let Some(id) = self.id {
            write!(f, "/{id}")?;
        }
        Ok(())
    }
}

/// An action on a resource, e.g. `write:orgs/<org>/tasks/<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub action: Action,
    pub resource: Resource,
}

impl Permission {
    pub fn new(action: Action, resource: Resource) -> Self {
        Self { action, resource }
    }

    /// Whether holding `self` is enough to perform `requested`.
    pub fn matches(&self, requested: &Permission) -> bool {
        self.action == requested.action && self.resource.covers(&requested.resource)
    }

    /// Read and write over every resource kind in every organization.
    pub fn operator() -> Vec<Permission> {
        [ResourceType::Tasks, ResourceType::Orgs]
            .into_iter()
            .flat_map(|kind| {
                [Action::Read, Action::Write].into_iter().map(move |action| {
                    Permission::new(
                        action,
                        Resource {
                            kind,
                            org_id: None,
                            id: None,
                        },
                    )
                })
            })
            .collect()
    }

    /// Read and write on every task of one organization, plus read on the org.
    pub fn org_tasks(org_id: OrgId) -> Vec<Permission> {
        vec![
            Permission::new(Action::Read, Resource::tasks(org_id, None)),
            Permission::new(Action::Write, Resource::tasks(org_id, None)),
            Permission::new(Action::Read, Resource::org(org_id)),
        ]
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    #[default]
    Active,
    Inactive,
}

/// An API credential issued to a user inside one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub id: AuthorizationId,
    #[serde(rename = "orgID")]
    pub org_id: OrgId,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(default)]
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Authorization {
    pub fn is_active(&self) -> bool {
        self.status == AuthorizationStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Owner,
    Member,
}

/// Links a user to a resource as owner or member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResourceMapping {
    #[serde(rename = "resourceType")]
    pub resource_type: ResourceType,
    #[serde(rename = "resourceID")]
    pub resource_id: Ulid,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "userType")]
    pub user_type: UserType,
}

/// Criteria for [`UserResourceMapping`] lookups; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingFilter {
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<Ulid>,
    pub user_id: Option<UserId>,
    pub user_type: Option<UserType>,
}

impl MappingFilter {
    /// Owners of one organization.
    pub fn org_owners(org_id: OrgId) -> Self {
        Self {
            resource_type: Some(ResourceType::Orgs),
            resource_id: Some(org_id.as_ulid()),
            user_id: None,
            user_type: Some(UserType::Owner),
        }
    }

    pub fn matches(&self, mapping: &UserResourceMapping) -> bool {
        self.resource_type.is_none_or(|t| t == mapping.resource_type)
            && self.resource_id.is_none_or(|id| id == mapping.resource_id)
            && self.user_id.is_none_or(|id| id == mapping.user_id)
            && self.user_type.is_none_or(|t| t == mapping.user_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> OrgId {
        OrgId::from_ulid(Ulid::from_parts(1, 1))
    }

    fn task() -> TaskId {
        TaskId::from_ulid(Ulid::from_parts(2, 2))
    }

    #[test]
    fn org_wide_permission_covers_each_task() {
        let granted = Permission::new(Action::Write, Resource::tasks(org(), None));
        let wanted = Permission::new(Action::Write, Resource::tasks(org(), Some(task())));
        assert!(granted.matches(&wanted));
        assert!(!wanted.matches(&granted));
    }

    #[test]
    fn actions_are_not_interchangeable() {
        let granted = Permission::new(Action::Read, Resource::tasks(org(), None));
        let wanted = Permission::new(Action::Write, Resource::tasks(org(), None));
        assert!(!granted.matches(&wanted));
    }

    #[test]
    fn other_orgs_are_not_covered() {
        let other = OrgId::from_ulid(Ulid::from_parts(9, 9));
        let granted = Permission::new(Action::Read, Resource::tasks(org(), None));
        let wanted = Permission::new(Action::Read, Resource::tasks(other, None));
        assert!(!granted.matches(&wanted));
    }

    #[test]
    fn operator_permissions_cover_everything() {
        let wanted = Permission::new(Action::Write, Resource::tasks(org(), Some(task())));
        assert!(Permission::operator().iter().any(|p| p.matches(&wanted)));
    }

    #[test]
    fn permission_display_names_the_path() {
        let p = Permission::new(Action::Write, Resource::tasks(org(), Some(task())));
        assert_eq!(p.to_string(), format!("write:orgs/{}/tasks/{}", org(), task()));
    }

    #[test]
    fn mapping_filter_matches_org_owners_only() {
        let owner = UserResourceMapping {
            resource_type: ResourceType::Orgs,
            resource_id: org().as_ulid(),
            user_id: UserId::from_ulid(Ulid::from_parts(3, 3)),
            user_type: UserType::Owner,
        };
        let member = UserResourceMapping {
            user_type: UserType::Member,
            ..owner.clone()
        };
        let filter = MappingFilter::org_owners(org());
        assert!(filter.matches(&owner));
        assert!(!filter.matches(&member));
    }
}
