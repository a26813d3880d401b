//! Persistent `sessions` rows (§3): distinct from a live connection. Issued
//! at login, invalidated at logout, expired by idle TTL against
//! `last_activity`.

use sqlx::PgPool;

use crate::error::{classify_sqlx_error, StorageError};

pub async fn create_session(
    pool: &PgPool,
    session_id: &str,
    user_id: i64,
) -> Result<(), StorageError> {
    sqlx::query("INSERT INTO sessions (session_id, user_id) VALUES ($1, $2)")
        .bind(session_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}

pub async fn invalidate_session(pool: &PgPool, session_id: &str) -> Result<(), StorageError> {
    let result = sqlx::query("UPDATE sessions SET active = false WHERE session_id = $1")
        .bind(session_id)
        .execute(pool)
        .await
        .map_err(classify_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

pub async fn touch_session(pool: &PgPool, session_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE sessions SET last_activity = now() WHERE session_id = $1 AND active")
        .bind(session_id)
        .execute(pool)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}

/// Marks every session idle beyond `ttl_seconds` inactive. Called from the
/// supervisor's periodic cleanup job (§4.G).
pub async fn expire_idle_sessions(pool: &PgPool, ttl_seconds: i64) -> Result<u64, StorageError> {
    let result = sqlx::query(
        "UPDATE sessions SET active = false
         WHERE active AND last_activity < now() - make_interval(secs => $1)",
    )
    .bind(ttl_seconds as f64)
    .execute(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(result.rows_affected())
}
