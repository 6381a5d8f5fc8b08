use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use super::models::{KeyRecord, KeyRecordUpdate, RoleRecord};
use crate::db::{iam_role_kms_keys, iam_roles};

/// Persistence contract for key records and the roles they serve.
///
/// Deletions report the number of rows removed; removing something that is
/// already gone is not an error.
#[async_trait]
pub trait KeyRecordStore: Send + Sync {
    async fn get_by_role_and_region(
        &self,
        role_id: &str,
        region: &str,
    ) -> sqlx::Result<Option<KeyRecord>>;

    async fn get_inactive_or_orphaned(
        &self,
        before: DateTime<Utc>,
    ) -> sqlx::Result<Vec<KeyRecord>>;

    async fn get_orphaned_roles(&self) -> sqlx::Result<Vec<RoleRecord>>;

    async fn insert_key_record(&self, record: &KeyRecord) -> sqlx::Result<()>;

    /// Refreshes timestamps and actor. Never touches `external_key_id`.
    async fn update_key_record(&self, update: &KeyRecordUpdate) -> sqlx::Result<u64>;

    async fn delete_key_record_by_id(&self, id: &str) -> sqlx::Result<u64>;

    async fn delete_role_by_id(&self, id: &str) -> sqlx::Result<u64>;
}

#[derive(Clone)]
pub struct PgKeyRecordStore {
    pool: PgPool,
}

impl PgKeyRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyRecordStore for PgKeyRecordStore {
    async fn get_by_role_and_region(
        &self,
        role_id: &str,
        region: &str,
    ) -> sqlx::Result<Option<KeyRecord>> {
        iam_role_kms_keys::get_by_role_and_region(&self.pool, role_id, region).await
    }

    async fn get_inactive_or_orphaned(
        &self,
        before: DateTime<Utc>,
    ) -> sqlx::Result<Vec<KeyRecord>> {
        iam_role_kms_keys::get_inactive_or_orphaned(&self.pool, before).await
    }

    async fn get_orphaned_roles(&self) -> sqlx::Result<Vec<RoleRecord>> {
        iam_roles::get_orphaned(&self.pool).await
    }

    async fn insert_key_record(&self, record: &KeyRecord) -> sqlx::Result<()> {
        iam_role_kms_keys::insert(&self.pool, record).await
    }

    async fn update_key_record(&self, update: &KeyRecordUpdate) -> sqlx::Result<u64> {
        iam_role_kms_keys::update_timestamps(&self.pool, update).await
    }

    async fn delete_key_record_by_id(&self, id: &str) -> sqlx::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = iam_role_kms_keys::delete_by_id(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_role_by_id(&self, id: &str) -> sqlx::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = iam_roles::delete_by_id(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(removed)
    }
}

#[derive(Default)]
struct MemoryTables {
    keys: HashMap<String, KeyRecord>,
    roles: HashMap<String, RoleRecord>,
    /// Role ids that still back at least one consumer permission.
    consumers: HashSet<String>,
}

/// Store backed by process memory, used with the emulated key service.
#[derive(Default)]
pub struct InMemoryKeyRecordStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryKeyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_role(&self, role: RoleRecord) {
        self.tables.write().await.roles.insert(role.id.clone(), role);
    }

    /// Marks the role as backing a consumer permission.
    pub async fn attach_consumer(&self, role_id: &str) {
        self.tables
            .write()
            .await
            .consumers
            .insert(role_id.to_string());
    }

    pub async fn detach_consumer(&self, role_id: &str) {
        self.tables.write().await.consumers.remove(role_id);
    }

    pub async fn key_records(&self) -> Vec<KeyRecord> {
        self.tables.read().await.keys.values().cloned().collect()
    }

    pub async fn role_ids(&self) -> Vec<String> {
        self.tables.read().await.roles.keys().cloned().collect()
    }
}

#[async_trait]
impl KeyRecordStore for InMemoryKeyRecordStore {
    async fn get_by_role_and_region(
        &self,
        role_id: &str,
        region: &str,
    ) -> sqlx::Result<Option<KeyRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys
            .values()
            .find(|record| record.role_id == role_id && record.region == region)
            .cloned())
    }

    async fn get_inactive_or_orphaned(
        &self,
        before: DateTime<Utc>,
    ) -> sqlx::Result<Vec<KeyRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<KeyRecord> = tables
            .keys
            .values()
            .filter(|record| {
                record.last_validated_at < before || !tables.consumers.contains(&record.role_id)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.last_validated_at.cmp(&b.last_validated_at));
        Ok(records)
    }

    async fn get_orphaned_roles(&self) -> sqlx::Result<Vec<RoleRecord>> {
        let tables = self.tables.read().await;
        let mut roles: Vec<RoleRecord> = tables
            .roles
            .values()
            .filter(|role| !tables.consumers.contains(&role.id))
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.last_updated_at.cmp(&b.last_updated_at));
        Ok(roles)
    }

    async fn insert_key_record(&self, record: &KeyRecord) -> sqlx::Result<()> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .keys
            .values()
            .any(|existing| existing.role_id == record.role_id && existing.region == record.region);
        if taken || tables.keys.contains_key(&record.id) {
            return Err(sqlx::Error::Protocol(format!(
                "duplicate key record for role {} in {}",
                record.role_id, record.region
            )));
        }
        tables.keys.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_key_record(&self, update: &KeyRecordUpdate) -> sqlx::Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(record) = tables
            .keys
            .values_mut()
            .find(|record| record.role_id == update.role_id && record.region == update.region)
        else {
            return Ok(0);
        };
        record.last_updated_by = update.last_updated_by.clone();
        record.last_updated_at = update.last_updated_at;
        record.last_validated_at = update.last_validated_at;
        Ok(1)
    }

    async fn delete_key_record_by_id(&self, id: &str) -> sqlx::Result<u64> {
        Ok(self.tables.write().await.keys.remove(id).map_or(0, |_| 1))
    }

    async fn delete_role_by_id(&self, id: &str) -> sqlx::Result<u64> {
        let mut tables = self.tables.write().await;
        let referenced = tables.keys.values().any(|record| record.role_id == id);
        if referenced {
            return Err(sqlx::Error::Protocol(format!(
                "role {id} is still referenced by a key record"
            )));
        }
        Ok(tables.roles.remove(id).map_or(0, |_| 1))
    }
}
