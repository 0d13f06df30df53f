//! Authorizer port - 呼び出し元の権限
//!
//! すべての service 呼び出しは `Context` を受け取り、その中の `Authorizer` で
//! 権限を判定します。`Context` に authorizer が無ければ何も許可されません。
//!
//! # 実装
//! - `Authorization`: 保存された credential（active のときだけ有効）
//! - `SystemAuthorizer`: scheduler / CLI / migration 用の全権限

use std::sync::Arc;

use crate::domain::auth::{Authorization, Permission};
use crate::domain::errors::{Error, Result};
use crate::domain::ids::UserId;

/// Authorizer は permission を判定する
pub trait Authorizer: Send + Sync {
    fn allowed(&self, permission: &Permission) -> bool;

    /// 実行ユーザー（system には無い）
    fn user_id(&self) -> Option<UserId>;

    /// ログ用の種別名
    fn kind(&self) -> &'static str;
}

impl Authorizer for Authorization {
    fn allowed(&self, permission: &Permission) -> bool {
        self.is_active() && self.permissions.iter().any(|p| p.matches(permission))
    }

    fn user_id(&self) -> Option<UserId> {
        Some(self.user_id)
    }

    fn kind(&self) -> &'static str {
        "authorization"
    }
}

/// SystemAuthorizer は内部の呼び出し元にすべてを許可する
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAuthorizer;

impl Authorizer for SystemAuthorizer {
    fn allowed(&self, _permission: &Permission) -> bool {
        true
    }

    fn user_id(&self) -> Option<UserId> {
        None
    }

    fn kind(&self) -> &'static str {
        "system"
    }
}

/// Per-call context carrying the caller's authorizer.
#[derive(Clone, Default)]
pub struct Context {
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl Context {
    /// A context with no authorizer; every checked operation is refused.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context for internal callers.
    pub fn system() -> Self {
        Self::background().with_authorizer(Arc::new(SystemAuthorizer))
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn authorizer(&self) -> Result<&dyn Authorizer> {
        self.authorizer
            .as_deref()
            .ok_or_else(|| Error::unauthorized("authorizer not found on context"))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("authorizer", &self.authorizer.as_ref().map(|a| a.kind()))
            .finish()
    }
}
