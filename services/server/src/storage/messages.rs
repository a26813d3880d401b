//! Append-only direct and group message history (§3, §4.B).

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::{classify_sqlx_error, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Single,
    Group,
}

impl ChatType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub message_id: i64,
    pub sender_username: String,
    /// Present only for single-chat rows.
    pub receiver_username: Option<String>,
    /// Present only for group-chat rows.
    pub group_id: Option<String>,
    pub content: String,
    pub content_type: String,
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
}

pub async fn save_direct_message(
    pool: &PgPool,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
    content_type: &str,
    encrypted: bool,
) -> Result<i64, StorageError> {
    let row = sqlx::query(
        r#"INSERT INTO messages (sender_id, receiver_id, content, content_type, encrypted)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING message_id"#,
    )
    .bind(sender_id)
    .bind(receiver_id)
    .bind(content)
    .bind(content_type)
    .bind(encrypted)
    .fetch_one(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(row.get("message_id"))
}

pub async fn save_group_message(
    pool: &PgPool,
    group_id: &str,
    sender_id: i64,
    content: &str,
    content_type: &str,
    encrypted: bool,
) -> Result<i64, StorageError> {
    let row = sqlx::query(
        r#"INSERT INTO group_messages (group_id, sender_id, content, content_type, encrypted)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING message_id"#,
    )
    .bind(group_id)
    .bind(sender_id)
    .bind(content)
    .bind(content_type)
    .bind(encrypted)
    .fetch_one(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(row.get("message_id"))
}

/// Resolves `target` (username or group_id, per chat type), then returns
/// rows newest-first. An unresolvable target yields an empty set, never an
/// error (§4.B invariant).
#[allow(clippy::too_many_arguments)]
pub async fn fetch_history(
    pool: &PgPool,
    chat_type: ChatType,
    target: &str,
    viewer_user_id: i64,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: i64,
    offset: i64,
) -> Result<Vec<HistoryRow>, StorageError> {
    match chat_type {
        ChatType::Single => {
            let target_id = match super::resolve_user_ref(pool, target).await? {
                Some(id) => id,
                None => return Ok(Vec::new()),
            };
            let rows = sqlx::query(
                r#"SELECT m.message_id, su.username AS sender_username, ru.username AS receiver_username,
                          m.content, m.content_type, m.encrypted, m.created_at
                   FROM messages m
                   JOIN users su ON su.user_id = m.sender_id
                   JOIN users ru ON ru.user_id = m.receiver_id
                   WHERE ((m.sender_id = $1 AND m.receiver_id = $2)
                       OR (m.sender_id = $2 AND m.receiver_id = $1))
                     AND ($3::timestamptz IS NULL OR m.created_at >= $3)
                     AND ($4::timestamptz IS NULL OR m.created_at <= $4)
                   ORDER BY m.created_at DESC
                   LIMIT $5 OFFSET $6"#,
            )
            .bind(viewer_user_id)
            .bind(target_id)
            .bind(since)
            .bind(until)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(classify_sqlx_error)?;

            Ok(rows
                .into_iter()
                .map(|row| HistoryRow {
                    message_id: row.get("message_id"),
                    sender_username: row.get("sender_username"),
                    receiver_username: row.get("receiver_username"),
                    group_id: None,
                    content: row.get("content"),
                    content_type: row.get("content_type"),
                    encrypted: row.get("encrypted"),
                    timestamp: row.get("created_at"),
                })
                .collect())
        }
        ChatType::Group => {
            let rows = sqlx::query(
                r#"SELECT gm.message_id, su.username AS sender_username, gm.group_id,
                          gm.content, gm.content_type, gm.encrypted, gm.created_at
                   FROM group_messages gm
                   JOIN users su ON su.user_id = gm.sender_id
                   WHERE gm.group_id = $1
                     AND ($2::timestamptz IS NULL OR gm.created_at >= $2)
                     AND ($3::timestamptz IS NULL OR gm.created_at <= $3)
                   ORDER BY gm.created_at DESC
                   LIMIT $4 OFFSET $5"#,
            )
            .bind(target)
            .bind(since)
            .bind(until)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(classify_sqlx_error)?;

            Ok(rows
                .into_iter()
                .map(|row| HistoryRow {
                    message_id: row.get("message_id"),
                    sender_username: row.get("sender_username"),
                    receiver_username: None,
                    group_id: row.get("group_id"),
                    content: row.get("content"),
                    content_type: row.get("content_type"),
                    encrypted: row.get("encrypted"),
                    timestamp: row.get("created_at"),
                })
                .collect())
        }
    }
}
