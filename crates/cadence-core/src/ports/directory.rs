//! Directory port - organization / user / authorization / mapping の参照
//!
//! task の所有者解決と存在確認にだけ使います。書き込みはしません。
//!
//! # 実装
//! - `impls::KvDirectory`: 同じ KV Store 上の bucket から読む

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::auth::{Authorization, MappingFilter, Organization, User, UserResourceMapping};
use crate::domain::errors::Result;
use crate::domain::ids::{AuthorizationId, OrgId, UserId};

/// Directory は外部の identity 情報を引く
///
/// `find_*` は存在しなければ `NotFound` を返します。
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_organization(&self, id: OrgId) -> Result<Organization>;

    async fn find_user(&self, id: UserId) -> Result<User>;

    async fn find_authorization(&self, id: AuthorizationId) -> Result<Authorization>;

    /// 条件に合う mapping を保存順に返す（該当なしは空）
    async fn find_resource_mappings(&self, filter: &MappingFilter) -> Result<Vec<UserResourceMapping>>;
}

#[async_trait]
impl<D: Directory + ?Sized> Directory for Arc<D> {
    async fn find_organization(&self, id: OrgId) -> Result<Organization> {
        (**self).find_organization(id).await
    }

    async fn find_user(&self, id: UserId) -> Result<User> {
        (**self).find_user(id).await
    }

    async fn find_authorization(&self, id: AuthorizationId) -> Result<Authorization> {
        (**self).find_authorization(id).await
    }

    async fn find_resource_mappings(&self, filter: &MappingFilter) -> Result<Vec<UserResourceMapping>> {
        (**self).find_resource_mappings(filter).await
    }
}
