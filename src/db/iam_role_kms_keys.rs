use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use crate::kms::models::{KeyRecord, KeyRecordUpdate};

const KEY_COLUMNS: &str = "id, role_id, external_key_id, region, created_by, last_updated_by, created_at, last_updated_at, last_validated_at";

pub async fn get_by_role_and_region<'c, E>(
    executor: E,
    role_id: &str,
    region: &str,
) -> Result<Option<KeyRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, KeyRecord>(&format!(
        "SELECT {KEY_COLUMNS} FROM iam_role_kms_keys WHERE role_id = $1 AND region = $2"
    ))
    .bind(role_id)
    .bind(region)
    .fetch_optional(executor)
    .await
}

/// Keys not validated since `before`, plus keys whose role no longer backs any
/// consumer permission.
pub async fn get_inactive_or_orphaned<'c, E>(
    executor: E,
    before: DateTime<Utc>,
) -> Result<Vec<KeyRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, KeyRecord>(&format!(
        r#"
        SELECT {KEY_COLUMNS}
        FROM iam_role_kms_keys k
        WHERE k.last_validated_at < $1
           OR NOT EXISTS (
                SELECT 1 FROM iam_role_permissions p WHERE p.role_id = k.role_id
           )
        ORDER BY k.last_validated_at ASC
        "#
    ))
    .bind(before)
    .fetch_all(executor)
    .await
}

pub async fn insert<'c, E>(executor: E, record: &KeyRecord) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO iam_role_kms_keys (
            id,
            role_id,
            external_key_id,
            region,
            created_by,
            last_updated_by,
            created_at,
            last_updated_at,
            last_validated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&record.id)
    .bind(&record.role_id)
    .bind(&record.external_key_id)
    .bind(&record.region)
    .bind(&record.created_by)
    .bind(&record.last_updated_by)
    .bind(record.created_at)
    .bind(record.last_updated_at)
    .bind(record.last_validated_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_timestamps<'c, E>(
    executor: E,
    update: &KeyRecordUpdate,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE iam_role_kms_keys
        SET last_updated_by = $1, last_updated_at = $2, last_validated_at = $3
        WHERE role_id = $4 AND region = $5
        "#,
    )
    .bind(&update.last_updated_by)
    .bind(update.last_updated_at)
    .bind(update.last_validated_at)
    .bind(&update.role_id)
    .bind(&update.region)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_by_id<'c, E>(executor: E, id: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM iam_role_kms_keys WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
