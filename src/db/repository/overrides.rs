//! Stream overrides repository

use sqlx::{PgConnection, PgPool};

use crate::db::models::OverrideRow;
use crate::models::OverridePatch;

const SELECT_COLUMNS: &str = r#"
    SELECT content_id, enabled, display_name, directory_id, directory_name,
           logo_url, group_label, updated_at
    FROM stream_overrides
"#;

/// Merge a patch into the stored row. NULL columns in the patch keep the
/// stored value.
pub async fn upsert_merge(
    conn: &mut PgConnection,
    content_id: &str,
    patch: &OverridePatch,
) -> Result<OverrideRow, sqlx::Error> {
    sqlx::query_as::<_, OverrideRow>(
        r#"
        INSERT INTO stream_overrides
            (content_id, enabled, display_name, directory_id, directory_name, logo_url, group_label, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        ON CONFLICT (content_id) DO UPDATE SET
            enabled = COALESCE(EXCLUDED.enabled, stream_overrides.enabled),
            display_name = COALESCE(EXCLUDED.display_name, stream_overrides.display_name),
            directory_id = COALESCE(EXCLUDED.directory_id, stream_overrides.directory_id),
            directory_name = COALESCE(EXCLUDED.directory_name, stream_overrides.directory_name),
            logo_url = COALESCE(EXCLUDED.logo_url, stream_overrides.logo_url),
            group_label = COALESCE(EXCLUDED.group_label, stream_overrides.group_label),
            updated_at = NOW()
        RETURNING content_id, enabled, display_name, directory_id, directory_name,
                  logo_url, group_label, updated_at
        "#,
    )
    .bind(content_id)
    .bind(patch.enabled)
    .bind(&patch.display_name)
    .bind(&patch.directory_id)
    .bind(&patch.directory_name)
    .bind(&patch.logo_url)
    .bind(&patch.group_label)
    .fetch_one(conn)
    .await
}

/// Get one override
pub async fn find_by_content_id(
    pool: &PgPool,
    content_id: &str,
) -> Result<Option<OverrideRow>, sqlx::Error> {
    sqlx::query_as::<_, OverrideRow>(&format!("{} WHERE content_id = $1", SELECT_COLUMNS))
        .bind(content_id)
        .fetch_optional(pool)
        .await
}

/// Get all overrides
pub async fn list_all(pool: &PgPool) -> Result<Vec<OverrideRow>, sqlx::Error> {
    sqlx::query_as::<_, OverrideRow>(&format!("{} ORDER BY content_id", SELECT_COLUMNS))
        .fetch_all(pool)
        .await
}

/// Delete an override, returns true if a row was removed
pub async fn delete(pool: &PgPool, content_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM stream_overrides WHERE content_id = $1")
        .bind(content_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
