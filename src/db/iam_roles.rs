use sqlx::{Executor, Postgres};

use crate::kms::models::RoleRecord;

/// Roles with no remaining consumer permission.
pub async fn get_orphaned<'c, E>(executor: E) -> Result<Vec<RoleRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RoleRecord>(
        r#"
        SELECT r.id, r.arn, r.last_updated_at
        FROM iam_roles r
        WHERE NOT EXISTS (
            SELECT 1 FROM iam_role_permissions p WHERE p.role_id = r.id
        )
        ORDER BY r.last_updated_at ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

pub async fn delete_by_id<'c, E>(executor: E, id: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM iam_roles WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
