//! KvDirectory - KV Store 上の Directory 実装
//!
//! # Bucket
//! - `organizationsv1`: org id → JSON
//! - `usersv1`: user id → JSON
//! - `authorizationsv1`: authorization id → JSON
//! - `userresourcemappingsv1`: resource id ‖ user id → JSON
//!
//! `create_*` は bootstrap / テスト用の書き込み口です。

use async_trait::async_trait;
use tracing::debug;

use crate::domain::auth::{Authorization, MappingFilter, Organization, User, UserResourceMapping};
use crate::domain::errors::{Error, Result};
use crate::domain::ids::{AuthorizationId, OrgId, UserId};
use crate::ports::kv::{compound_key, Store};
use crate::ports::Directory;

pub const ORGANIZATIONS_BUCKET: &str = "organizationsv1";
pub const USERS_BUCKET: &str = "usersv1";
pub const AUTHORIZATIONS_BUCKET: &str = "authorizationsv1";
pub const MAPPINGS_BUCKET: &str = "userresourcemappingsv1";

pub struct KvDirectory<S> {
    store: S,
}

impl<S: Store> KvDirectory<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn initialize(&self) -> Result<()> {
        for bucket in [ORGANIZATIONS_BUCKET, USERS_BUCKET, AUTHORIZATIONS_BUCKET, MAPPINGS_BUCKET] {
            self.store.create_bucket(bucket)?;
        }
        Ok(())
    }

    pub fn create_organization(&self, org: &Organization) -> Result<()> {
        let value = serde_json::to_vec(org)?;
        self.store.update(|tx| {
            tx.bucket(ORGANIZATIONS_BUCKET).put(&org.id.encode(), &value)?;
            Ok(())
        })?;
        debug!(org_id = %org.id, name = %org.name, "organization created");
        Ok(())
    }

    pub fn create_user(&self, user: &User) -> Result<()> {
        let value = serde_json::to_vec(user)?;
        self.store.update(|tx| {
            tx.bucket(USERS_BUCKET).put(&user.id.encode(), &value)?;
            Ok(())
        })?;
        debug!(user_id = %user.id, "user created");
        Ok(())
    }

    pub fn create_authorization(&self, auth: &Authorization) -> Result<()> {
        let value = serde_json::to_vec(auth)?;
        self.store.update(|tx| {
            tx.bucket(AUTHORIZATIONS_BUCKET).put(&auth.id.encode(), &value)?;
            Ok(())
        })?;
        debug!(authorization_id = %auth.id, "authorization created");
        Ok(())
    }

    pub fn create_resource_mapping(&self, mapping: &UserResourceMapping) -> Result<()> {
        let key = compound_key(&mapping.resource_id.to_bytes(), &mapping.user_id.encode());
        let value = serde_json::to_vec(mapping)?;
        self.store.update(|tx| {
            tx.bucket(MAPPINGS_BUCKET).put(&key, &value)?;
            Ok(())
        })?;
        Ok(())
    }

    fn get<T: serde::de::DeserializeOwned>(&self, bucket: &str, key: &[u8], missing: &str) -> Result<T> {
        let raw = self.store.view(|tx| Ok(tx.bucket(bucket).get(key)?))?;
        match raw {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Err(Error::not_found(missing)),
        }
    }
}

#[async_trait]
impl<S: Store> Directory for KvDirectory<S> {
    async fn find_organization(&self, id: OrgId) -> Result<Organization> {
        self.get(ORGANIZATIONS_BUCKET, &id.encode(), "organization not found")
    }

    async fn find_user(&self, id: UserId) -> Result<User> {
        self.get(USERS_BUCKET, &id.encode(), "user not found")
    }

    async fn find_authorization(&self, id: AuthorizationId) -> Result<Authorization> {
        self.get(AUTHORIZATIONS_BUCKET, &id.encode(), "authorization not found")
    }

    async fn find_resource_mappings(&self, filter: &MappingFilter) -> Result<Vec<UserResourceMapping>> {
        let prefix = filter
            .resource_id
            .map(|id| id.to_bytes().to_vec())
            .unwrap_or_default();
        let entries = self.store.view(|tx| Ok(tx.bucket(MAPPINGS_BUCKET).cursor(&prefix)?))?;

        let mut found = Vec::new();
        for (_, raw) in entries {
            let mapping: UserResourceMapping = serde_json::from_slice(&raw)?;
            if filter.matches(&mapping) {
                found.push(mapping);
            }
        }
        Ok(found)
    }
}
