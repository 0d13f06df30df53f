//! Shared setup for the service unit tests.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use ulid::Ulid;

use crate::app::builder::ServiceBuilder;
use crate::app::owner::OwnerResolver;
use crate::app::service::KvTaskService;
use crate::app::TaskService;
use crate::domain::auth::{
    Authorization, AuthorizationStatus, Organization, Permission, ResourceType, User,
    UserResourceMapping, UserType,
};
use crate::domain::ids::{AuthorizationId, OrgId, RunId, TaskId, UserId};
use crate::domain::task::{Task, TaskCreate};
use crate::impls::{InMemoryStore, KvDirectory};
use crate::ports::{Context, FixedClock, IdGenerator};

pub(crate) struct Fixture {
    pub service: KvTaskService<InMemoryStore>,
    pub directory: Arc<KvDirectory<InMemoryStore>>,
    pub clock: FixedClock,
    pub org: OrgId,
    /// Member of `org` with read/write on its tasks.
    pub user: UserId,
    /// Owner mapping on `org`.
    pub owner: UserId,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap());
        let org = OrgId::from_ulid(Ulid::new());
        let user = UserId::from_ulid(Ulid::new());
        let owner = UserId::from_ulid(Ulid::new());

        let directory = Arc::new(KvDirectory::new(InMemoryStore::new()));
        directory
            .create_organization(&Organization {
                id: org,
                name: "acme".into(),
            })
            .unwrap();
        for (id, name) in [(user, "member"), (owner, "owner")] {
            directory
                .create_user(&User {
                    id,
                    name: name.into(),
                })
                .unwrap();
        }
        directory
            .create_resource_mapping(&UserResourceMapping {
                resource_type: ResourceType::Orgs,
                resource_id: org.as_ulid(),
                user_id: owner,
                user_type: UserType::Owner,
            })
            .unwrap();

        let service = ServiceBuilder::new(InMemoryStore::new())
            .directory(directory.clone())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        Self {
            service,
            directory,
            clock,
            org,
            user,
            owner,
        }
    }

    fn authorization(&self, org: OrgId) -> Authorization {
        Authorization {
            id: AuthorizationId::from_ulid(Ulid::new()),
            org_id: org,
            user_id: self.user,
            status: AuthorizationStatus::Active,
            permissions: Permission::org_tasks(org),
            description: String::new(),
        }
    }

    pub fn member_ctx(&self) -> Context {
        Context::background().with_authorizer(Arc::new(self.authorization(self.org)))
    }

    /// Caller whose permissions cover a different organization.
    pub fn stranger_ctx(&self) -> Context {
        let elsewhere = OrgId::from_ulid(Ulid::new());
        Context::background().with_authorizer(Arc::new(self.authorization(elsewhere)))
    }

    /// Builder over a fresh store with this fixture's directory and clock.
    pub fn builder(&self) -> ServiceBuilder<InMemoryStore> {
        ServiceBuilder::new(InMemoryStore::new())
            .directory(self.directory.clone())
            .clock(Arc::new(self.clock.clone()))
    }

    pub fn owners(&self) -> OwnerResolver {
        OwnerResolver::new(self.directory.clone())
    }

    /// Create a task owned by `user`, then tick the clock so ids stay ordered.
    pub async fn create(&self, flux: &str) -> Task {
        let task = self
            .service
            .create_task(&self.member_ctx(), TaskCreate::new(self.org, self.user, flux))
            .await
            .unwrap();
        self.clock.advance(Duration::milliseconds(1));
        task
    }
}

/// Hands out the same pair of ids on every call.
pub(crate) struct RepeatingIds {
    pub task: TaskId,
    pub run: RunId,
}

impl RepeatingIds {
    pub fn new() -> Self {
        Self {
            task: TaskId::from_ulid(Ulid::new()),
            run: RunId::from_ulid(Ulid::new()),
        }
    }
}

impl IdGenerator for RepeatingIds {
    fn generate_task_id(&self) -> TaskId {
        self.task
    }

    fn generate_run_id(&self) -> RunId {
        self.run
    }
}
