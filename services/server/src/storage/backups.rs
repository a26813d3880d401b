//! Opaque backup blob store (§4.E `backup`, §9: no retrieval path in this
//! revision — the spec mandates the store, not a read API).

use sqlx::PgPool;

use crate::error::{classify_sqlx_error, StorageError};

pub async fn save_backup(
    pool: &PgPool,
    user_id: i64,
    dest_id: &str,
    payload: &str,
    content_type: Option<&str>,
) -> Result<i64, StorageError> {
    let row = sqlx::query(
        r#"INSERT INTO backups (user_id, dest_id, payload, content_type)
           VALUES ($1, $2, $3, $4)
           RETURNING backup_id"#,
    )
    .bind(user_id)
    .bind(dest_id)
    .bind(payload)
    .bind(content_type)
    .fetch_one(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(sqlx::Row::get(&row, "backup_id"))
}
