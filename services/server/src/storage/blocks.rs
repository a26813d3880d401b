//! `blocked_users` CRUD — the resolution of the §9 open question: the
//! `blocked` error kind is backed by a SQL table, not a side JSON file.

use sqlx::{PgPool, Row};

use crate::error::{classify_sqlx_error, StorageError};

pub async fn block_user(pool: &PgPool, owner_user_id: i64, blocked_user_id: i64) -> Result<(), StorageError> {
    if owner_user_id == blocked_user_id {
        return Err(StorageError::Constraint);
    }
    sqlx::query(
        "INSERT INTO blocked_users (owner_user_id, blocked_user_id) VALUES ($1, $2)
         ON CONFLICT DO NOTHING",
    )
    .bind(owner_user_id)
    .bind(blocked_user_id)
    .execute(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(())
}

pub async fn unblock_user(pool: &PgPool, owner_user_id: i64, blocked_user_id: i64) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM blocked_users WHERE owner_user_id = $1 AND blocked_user_id = $2")
        .bind(owner_user_id)
        .bind(blocked_user_id)
        .execute(pool)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}

/// True if `blocked_user_id` has blocked `owner_user_id` from messaging
/// them — i.e. checked from the *recipient's* blocklist when the sender
/// tries to deliver (§4.E: "reject with `blocked` if the recipient has
/// blocked the sender").
pub async fn is_blocked(pool: &PgPool, recipient_id: i64, sender_id: i64) -> Result<bool, StorageError> {
    let row = sqlx::query(
        "SELECT EXISTS(SELECT 1 FROM blocked_users WHERE owner_user_id = $1 AND blocked_user_id = $2) AS exists",
    )
    .bind(recipient_id)
    .bind(sender_id)
    .fetch_one(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(row.get::<bool, _>("exists"))
}
