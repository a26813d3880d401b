//! Group and group-membership CRUD (§3, §4.B, §4.E). Membership insert is
//! idempotent by design (`ON CONFLICT DO NOTHING`); group creation is
//! likewise idempotent to support the liberal auto-create policy in
//! `group_message` (§4.E).

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::{classify_sqlx_error, StorageError};

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub group_id: String,
    pub group_name: String,
    pub creator_user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MembershipRow {
    pub group_id: String,
    pub user_id: i64,
    pub username: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

/// Creates the group if it doesn't exist yet, with `creator_user_id` as
/// implicit owner and sole member. Returns the existing group unchanged
/// (and does not re-add the creator) if it already exists.
pub async fn get_or_create_group(
    pool: &PgPool,
    group_id: &str,
    group_name: &str,
    creator_user_id: i64,
) -> Result<(GroupRow, bool), StorageError> {
    let mut tx = pool.begin().await.map_err(classify_sqlx_error)?;

    let existing = sqlx::query(
        "SELECT group_id, group_name, creator_user_id, created_at FROM groups WHERE group_id = $1",
    )
    .bind(group_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(classify_sqlx_error)?;

    if let Some(row) = existing {
        tx.commit().await.map_err(classify_sqlx_error)?;
        return Ok((
            GroupRow {
                group_id: row.get("group_id"),
                group_name: row.get("group_name"),
                creator_user_id: row.get("creator_user_id"),
                created_at: row.get("created_at"),
            },
            false,
        ));
    }

    let row = sqlx::query(
        r#"INSERT INTO groups (group_id, group_name, creator_user_id)
           VALUES ($1, $2, $3)
           RETURNING group_id, group_name, creator_user_id, created_at"#,
    )
    .bind(group_id)
    .bind(group_name)
    .bind(creator_user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(classify_sqlx_error)?;

    sqlx::query(
        "INSERT INTO group_members (group_id, user_id, role) VALUES ($1, $2, 'owner')
         ON CONFLICT DO NOTHING",
    )
    .bind(group_id)
    .bind(creator_user_id)
    .execute(&mut *tx)
    .await
    .map_err(classify_sqlx_error)?;

    tx.commit().await.map_err(classify_sqlx_error)?;

    Ok((
        GroupRow {
            group_id: row.get("group_id"),
            group_name: row.get("group_name"),
            creator_user_id: row.get("creator_user_id"),
            created_at: row.get("created_at"),
        },
        true,
    ))
}

pub async fn group_exists(pool: &PgPool, group_id: &str) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = $1) AS exists")
        .bind(group_id)
        .fetch_one(pool)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(row.get::<bool, _>("exists"))
}

pub async fn is_member(pool: &PgPool, group_id: &str, user_id: i64) -> Result<bool, StorageError> {
    let row = sqlx::query(
        "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2) AS exists",
    )
    .bind(group_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(row.get::<bool, _>("exists"))
}

/// Inserts `user_id` as a plain member if absent. Returns `true` if this
/// call actually added the row (used to distinguish `join_group`'s
/// `already_member` rejection from `group_message`'s silent auto-join).
pub async fn join_member(pool: &PgPool, group_id: &str, user_id: i64) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "INSERT INTO group_members (group_id, user_id, role) VALUES ($1, $2, 'member')
         ON CONFLICT DO NOTHING",
    )
    .bind(group_id)
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_members(pool: &PgPool, group_id: &str) -> Result<Vec<MembershipRow>, StorageError> {
    let rows = sqlx::query(
        r#"SELECT gm.group_id, gm.user_id, u.username, gm.role, gm.joined_at
           FROM group_members gm JOIN users u ON u.user_id = gm.user_id
           WHERE gm.group_id = $1
           ORDER BY gm.joined_at ASC"#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(rows
        .into_iter()
        .map(|row| MembershipRow {
            group_id: row.get("group_id"),
            user_id: row.get("user_id"),
            username: row.get("username"),
            role: row.get("role"),
            joined_at: row.get("joined_at"),
        })
        .collect())
}

/// Lists the groups a user belongs to, with their role and the group's
/// total member count (§4.E `get_groups`).
pub async fn list_groups_for_user(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<(GroupRow, String, i64)>, StorageError> {
    let rows = sqlx::query(
        r#"SELECT g.group_id, g.group_name, g.creator_user_id, g.created_at, gm.role,
                  (SELECT COUNT(*) FROM group_members gm2 WHERE gm2.group_id = g.group_id) AS member_count
           FROM groups g JOIN group_members gm ON gm.group_id = g.group_id
           WHERE gm.user_id = $1
           ORDER BY g.created_at ASC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                GroupRow {
                    group_id: row.get("group_id"),
                    group_name: row.get("group_name"),
                    creator_user_id: row.get("creator_user_id"),
                    created_at: row.get("created_at"),
                },
                row.get("role"),
                row.get("member_count"),
            )
        })
        .collect())
}
