//! OwnerResolver - 所有者が無い古い task の所有者を決める
//!
//! # 規則
//! 1. legacy の `authorizationID` があり、その authorization が存在する → その user
//! 2. それ以外 → organization の最初の owner mapping の user
//! 3. どちらも無い → `None`
//!
//! 読み取り時の補完と migration の両方がこの規則を使います。

use std::sync::Arc;

use tracing::debug;

use crate::domain::auth::MappingFilter;
use crate::domain::errors::Result;
use crate::domain::ids::{AuthorizationId, OrgId, UserId};
use crate::ports::Directory;

#[derive(Clone)]
pub struct OwnerResolver {
    directory: Arc<dyn Directory>,
}

impl OwnerResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(
        &self,
        org_id: OrgId,
        authorization_id: Option<AuthorizationId>,
    ) -> Result<Option<UserId>> {
        if let Some(auth_id) = authorization_id {
            match self.directory.find_authorization(auth_id).await {
                Ok(auth) => return Ok(Some(auth.user_id)),
                Err(err) if err.is_not_found() => {
                    debug!(%auth_id, "legacy authorization is gone, falling back to org owner");
                }
                Err(err) => return Err(err),
            }
        }

        let owners = self
            .directory
            .find_resource_mappings(&MappingFilter::org_owners(org_id))
            .await?;
        Ok(owners.first().map(|mapping| mapping.user_id))
    }
}
