//! Contact-book CRUD (§3, §4.B, §4.E). Storage is the single source of
//! truth (§9 open question, resolved): there is no parallel JSON store.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::{classify_sqlx_error, StorageError};

#[derive(Debug, Clone)]
pub struct ContactRow {
    pub owner_user_id: i64,
    pub contact_user_id: i64,
    pub contact_username: String,
    pub alias: Option<String>,
    pub group_label: String,
    pub notes: Option<String>,
    pub favorite: bool,
    pub added_at: DateTime<Utc>,
}

fn row_to_contact(row: sqlx::postgres::PgRow) -> ContactRow {
    ContactRow {
        owner_user_id: row.get("owner_user_id"),
        contact_user_id: row.get("contact_user_id"),
        contact_username: row.get("contact_username"),
        alias: row.get("alias"),
        group_label: row.get("group_label"),
        notes: row.get("notes"),
        favorite: row.get("favorite"),
        added_at: row.get("added_at"),
    }
}

pub async fn add_contact(
    pool: &PgPool,
    owner_user_id: i64,
    contact_user_id: i64,
    alias: Option<&str>,
    group_label: &str,
    notes: Option<&str>,
) -> Result<ContactRow, StorageError> {
    if owner_user_id == contact_user_id {
        return Err(StorageError::Constraint);
    }
    sqlx::query(
        r#"INSERT INTO contacts (owner_user_id, contact_user_id, alias, group_label, notes)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(owner_user_id)
    .bind(contact_user_id)
    .bind(alias)
    .bind(group_label)
    .bind(notes)
    .execute(pool)
    .await
    .map_err(classify_sqlx_error)?;

    get_contact(pool, owner_user_id, contact_user_id).await
}

pub async fn get_contact(
    pool: &PgPool,
    owner_user_id: i64,
    contact_user_id: i64,
) -> Result<ContactRow, StorageError> {
    let row = sqlx::query(
        r#"SELECT c.owner_user_id, c.contact_user_id, u.username AS contact_username,
                  c.alias, c.group_label, c.notes, c.favorite, c.added_at
           FROM contacts c JOIN users u ON u.user_id = c.contact_user_id
           WHERE c.owner_user_id = $1 AND c.contact_user_id = $2"#,
    )
    .bind(owner_user_id)
    .bind(contact_user_id)
    .fetch_optional(pool)
    .await
    .map_err(classify_sqlx_error)?
    .ok_or(StorageError::NotFound)?;
    Ok(row_to_contact(row))
}

pub async fn list_contacts(pool: &PgPool, owner_user_id: i64) -> Result<Vec<ContactRow>, StorageError> {
    let rows = sqlx::query(
        r#"SELECT c.owner_user_id, c.contact_user_id, u.username AS contact_username,
                  c.alias, c.group_label, c.notes, c.favorite, c.added_at
           FROM contacts c JOIN users u ON u.user_id = c.contact_user_id
           WHERE c.owner_user_id = $1
           ORDER BY c.added_at ASC"#,
    )
    .bind(owner_user_id)
    .fetch_all(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(rows.into_iter().map(row_to_contact).collect())
}

#[allow(clippy::too_many_arguments)]
pub async fn update_contact(
    pool: &PgPool,
    owner_user_id: i64,
    contact_user_id: i64,
    alias: Option<&str>,
    group_label: Option<&str>,
    notes: Option<&str>,
    favorite: Option<bool>,
) -> Result<ContactRow, StorageError> {
    let result = sqlx::query(
        r#"UPDATE contacts SET
               alias = COALESCE($3, alias),
               group_label = COALESCE($4, group_label),
               notes = COALESCE($5, notes),
               favorite = COALESCE($6, favorite)
           WHERE owner_user_id = $1 AND contact_user_id = $2"#,
    )
    .bind(owner_user_id)
    .bind(contact_user_id)
    .bind(alias)
    .bind(group_label)
    .bind(notes)
    .bind(favorite)
    .execute(pool)
    .await
    .map_err(classify_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    get_contact(pool, owner_user_id, contact_user_id).await
}

pub async fn remove_contact(
    pool: &PgPool,
    owner_user_id: i64,
    contact_user_id: i64,
) -> Result<(), StorageError> {
    let result = sqlx::query("DELETE FROM contacts WHERE owner_user_id = $1 AND contact_user_id = $2")
        .bind(owner_user_id)
        .bind(contact_user_id)
        .execute(pool)
        .await
        .map_err(classify_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}
