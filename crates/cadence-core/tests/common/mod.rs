#![allow(dead_code)]

use std::sync::Arc;

use cadence_core::app::{KvTaskService, ServiceBuilder, TaskService};
use cadence_core::domain::auth::{
    Authorization, AuthorizationStatus, Organization, Permission, ResourceType, User,
    UserResourceMapping, UserType,
};
use cadence_core::domain::{AuthorizationId, OrgId, Task, TaskCreate, TaskId, UserId};
use cadence_core::impls::{InMemoryStore, KvDirectory, RedbStore};
use cadence_core::ports::{Context, FixedClock, Store};
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;
use ulid::Ulid;

/// Run an async `fn(Harness<S>)` once per storage engine.
macro_rules! on_both_engines {
    ($($name:ident),* $(,)?) => {
        $(
            mod $name {
                #[tokio::test]
                async fn in_memory() {
                    super::$name(crate::common::in_memory()).await
                }

                #[tokio::test]
                async fn redb() {
                    super::$name(crate::common::redb()).await
                }
            }
        )*
    };
}

pub struct Harness<S> {
    pub service: KvTaskService<Arc<S>>,
    pub store: Arc<S>,
    pub directory: Arc<KvDirectory<Arc<S>>>,
    pub clock: FixedClock,
    pub org: OrgId,
    /// Member with read/write on the org's tasks.
    pub user: UserId,
    /// Owner mapping on the org.
    pub owner: UserId,
    /// User behind `legacy_auth`.
    pub legacy_user: UserId,
    pub legacy_auth: AuthorizationId,
    _dir: Option<TempDir>,
}

pub fn in_memory() -> Harness<InMemoryStore> {
    Harness::new(InMemoryStore::new(), None)
}

pub fn redb() -> Harness<RedbStore> {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(&dir.path().join("cadence.redb")).unwrap();
    Harness::new(store, Some(dir))
}

impl<S: Store + 'static> Harness<S> {
    fn new(store: S, dir: Option<TempDir>) -> Self {
        let store = Arc::new(store);
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap());
        let org = OrgId::from_ulid(Ulid::new());
        let user = UserId::from_ulid(Ulid::new());
        let owner = UserId::from_ulid(Ulid::new());
        let legacy_user = UserId::from_ulid(Ulid::new());
        let legacy_auth = AuthorizationId::from_ulid(Ulid::new());

        let directory = Arc::new(KvDirectory::new(Arc::clone(&store)));
        directory.initialize().unwrap();
        directory
            .create_organization(&Organization {
                id: org,
                name: "acme".into(),
            })
            .unwrap();
        for id in [user, owner, legacy_user] {
            directory
                .create_user(&User {
                    id,
                    name: id.to_string(),
                })
                .unwrap();
        }
        directory
            .create_authorization(&Authorization {
                id: legacy_auth,
                org_id: org,
                user_id: legacy_user,
                status: AuthorizationStatus::Active,
                permissions: Permission::org_tasks(org),
                description: "legacy token".into(),
            })
            .unwrap();
        directory
            .create_resource_mapping(&UserResourceMapping {
                resource_type: ResourceType::Orgs,
                resource_id: org.as_ulid(),
                user_id: owner,
                user_type: UserType::Owner,
            })
            .unwrap();

        let service = ServiceBuilder::new(Arc::clone(&store))
            .directory(directory.clone())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        Self {
            service,
            store,
            directory,
            clock,
            org,
            user,
            owner,
            legacy_user,
            legacy_auth,
            _dir: dir,
        }
    }

    pub fn member(&self) -> Context {
        Context::background().with_authorizer(Arc::new(Authorization {
            id: AuthorizationId::from_ulid(Ulid::new()),
            org_id: self.org,
            user_id: self.user,
            status: AuthorizationStatus::Active,
            permissions: Permission::org_tasks(self.org),
            description: String::new(),
        }))
    }

    /// Create a task owned by `user`; the clock ticks so ids follow creation order.
    pub async fn create(&self, flux: &str) -> Task {
        let task = self
            .service
            .create_task(&self.member(), TaskCreate::new(self.org, self.user, flux))
            .await
            .unwrap();
        self.clock.advance(Duration::milliseconds(1));
        task
    }

    /// Write a raw record straight into the tasks bucket.
    pub fn put_raw_task(&self, id: TaskId, raw: &str) {
        self.store
            .update(|tx| {
                tx.bucket("tasksv1").put(&id.encode(), raw.as_bytes())?;
                Ok(())
            })
            .unwrap();
    }

    pub fn raw_task(&self, id: TaskId) -> serde_json::Value {
        let raw = self
            .store
            .view(|tx| Ok(tx.bucket("tasksv1").get(&id.encode())?))
            .unwrap()
            .unwrap();
        serde_json::from_slice(&raw).unwrap()
    }
}
