//! Migrations - 保存形式の更新
//!
//! # Migrator
//! version 付きの migration を順番に適用し、適用済みのものを `migrationsv1`
//! bucket に記録します（key = version の big-endian 4 byte）。
//! 2 回目以降の `up()` は未適用の分だけを実行します。
//!
//! # OwnerMigration
//! `ownerID` の無い古い task に所有者を書き込みます。
//! record ごとに別の update transaction を使い、その中で読み直してから
//! raw JSON object に `ownerID` だけを追加します。他の field はそのままです。
//! 書き込みに失敗した record は `failed` に数えて、残りの record を続けます。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::app::owner::OwnerResolver;
use crate::app::service::{RUNS_BUCKET, TASKS_BUCKET, TASK_INDEX_BUCKET};
use crate::domain::errors::Result;
use crate::domain::ids::{AuthorizationId, OrgId, UserId};
use crate::domain::task::empty_as_none;
use crate::ports::kv::Store;
use crate::ports::Clock;

pub const MIGRATIONS_BUCKET: &str = "migrationsv1";

const OWNER_FIELD: &str = "ownerID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    CreateTaskBuckets,
    BackfillTaskOwnerIds,
}

/// Every migration, in application order.
pub const MIGRATIONS: [MigrationStep; 2] = [
    MigrationStep::CreateTaskBuckets,
    MigrationStep::BackfillTaskOwnerIds,
];

impl MigrationStep {
    pub fn version(&self) -> u32 {
        match self {
            MigrationStep::CreateTaskBuckets => 1,
            MigrationStep::BackfillTaskOwnerIds => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MigrationStep::CreateTaskBuckets => "create_task_buckets",
            MigrationStep::BackfillTaskOwnerIds => "backfill_task_owner_ids",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

pub struct Migrator<'a, S> {
    store: &'a S,
    owners: OwnerResolver,
    clock: Arc<dyn Clock>,
}

impl<'a, S: Store> Migrator<'a, S> {
    pub fn new(store: &'a S, owners: OwnerResolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            owners,
            clock,
        }
    }

    /// Recorded migrations in version order.
    pub fn applied(&self) -> Result<Vec<AppliedMigration>> {
        let entries = self
            .store
            .view(|tx| Ok(tx.bucket(MIGRATIONS_BUCKET).cursor(&[])?))?;
        let mut applied = Vec::with_capacity(entries.len());
        for (_, raw) in entries {
            applied.push(serde_json::from_slice(&raw)?);
        }
        Ok(applied)
    }

    /// Apply pending migrations and return the ones applied by this call.
    pub async fn up(&self) -> Result<Vec<AppliedMigration>> {
        self.store.create_bucket(MIGRATIONS_BUCKET)?;
        let done: Vec<u32> = self.applied()?.iter().map(|m| m.version).collect();

        let mut newly = Vec::new();
        for step in MIGRATIONS {
            if done.contains(&step.version()) {
                continue;
            }
            info!(version = step.version(), name = step.name(), "applying migration");
            match step {
                MigrationStep::CreateTaskBuckets => {
                    for bucket in [TASKS_BUCKET, TASK_INDEX_BUCKET, RUNS_BUCKET] {
                        self.store.create_bucket(bucket)?;
                    }
                }
                MigrationStep::BackfillTaskOwnerIds => {
                    OwnerMigration::new(self.owners.clone()).run(self.store).await?;
                }
            }

            let record = AppliedMigration {
                version: step.version(),
                name: step.name().to_string(),
                applied_at: self.clock.now(),
            };
            let value = serde_json::to_vec(&record)?;
            self.store.update(|tx| {
                tx.bucket(MIGRATIONS_BUCKET)
                    .put(&record.version.to_be_bytes(), &value)?;
                Ok(())
            })?;
            newly.push(record);
        }
        Ok(newly)
    }
}

/// The fields the owner backfill needs; everything else stays raw.
#[derive(Deserialize)]
struct OwnerFields {
    #[serde(rename = "orgID")]
    organization_id: OrgId,
    #[serde(rename = "authorizationID", default, deserialize_with = "empty_as_none")]
    authorization_id: Option<AuthorizationId>,
    #[serde(rename = "ownerID", default, deserialize_with = "empty_as_none")]
    owner_id: Option<UserId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnerMigrationReport {
    pub scanned: usize,
    pub repaired: usize,
    pub unresolved: usize,
    pub undecodable: usize,
    pub failed: usize,
}

pub struct OwnerMigration {
    owners: OwnerResolver,
}

impl OwnerMigration {
    pub fn new(owners: OwnerResolver) -> Self {
        Self { owners }
    }

    pub async fn run<S: Store>(&self, store: &S) -> Result<OwnerMigrationReport> {
        let entries = store.view(|tx| Ok(tx.bucket(TASKS_BUCKET).cursor(&[])?))?;
        let mut report = OwnerMigrationReport::default();

        for (key, raw) in entries {
            report.scanned += 1;
            let fields: OwnerFields = match serde_json::from_slice(&raw) {
                Ok(fields) => fields,
                Err(err) => {
                    warn!(key = ?key, error = %err, "skipping undecodable task record");
                    report.undecodable += 1;
                    continue;
                }
            };
            if fields.owner_id.is_some() {
                continue;
            }

            let owner = match self
                .owners
                .resolve(fields.organization_id, fields.authorization_id)
                .await
            {
                Ok(Some(owner)) => owner,
                Ok(None) => {
                    warn!(org_id = %fields.organization_id, key = ?key, "no owner found for task");
                    report.unresolved += 1;
                    continue;
                }
                Err(err) => {
                    warn!(org_id = %fields.organization_id, error = %err, "owner lookup failed");
                    report.unresolved += 1;
                    continue;
                }
            };

            let written = store.update(|tx| {
                let Some(current) = tx.bucket(TASKS_BUCKET).get(&key)? else {
                    return Ok(false);
                };
                let mut object: Map<String, Value> = serde_json::from_slice(&current)?;
                let has_owner = object
                    .get(OWNER_FIELD)
                    .and_then(Value::as_str)
                    .is_some_and(|id| !id.is_empty());
                if has_owner {
                    return Ok(false);
                }
                object.insert(OWNER_FIELD.to_string(), Value::String(owner.to_string()));
                tx.bucket(TASKS_BUCKET).put(&key, &serde_json::to_vec(&object)?)?;
                Ok(true)
            });
            match written {
                Ok(true) => report.repaired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(key = ?key, error = %err, "failed to write task owner");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            repaired = report.repaired,
            unresolved = report.unresolved,
            undecodable = report.undecodable,
            failed = report.failed,
            "owner backfill finished"
        );
        Ok(report)
    }
}
