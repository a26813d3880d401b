//! `users` table CRUD (§3, §4.B). `password_hash` never leaves this module
//! in a [`UserRow`] that crosses a handler boundary into a response.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::{classify_sqlx_error, StorageError};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub online: bool,
}

fn row_to_user(row: sqlx::postgres::PgRow) -> UserRow {
    UserRow {
        user_id: row.get("user_id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        salt: row.get("salt"),
        public_key: row.get("public_key"),
        created_at: row.get("created_at"),
        last_activity: row.get("last_activity"),
        online: row.get("online"),
    }
}

pub async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: &str,
    salt: &str,
    public_key: Option<&str>,
) -> Result<UserRow, StorageError> {
    let row = sqlx::query(
        r#"INSERT INTO users (username, email, password_hash, salt, public_key)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING user_id, username, email, password_hash, salt, public_key,
                     created_at, last_activity, online"#,
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(salt)
    .bind(public_key)
    .fetch_one(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(row_to_user(row))
}

pub async fn get_user_by_id(pool: &PgPool, user_id: i64) -> Result<UserRow, StorageError> {
    let row = sqlx::query(
        r#"SELECT user_id, username, email, password_hash, salt, public_key,
                  created_at, last_activity, online
           FROM users WHERE user_id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(classify_sqlx_error)?
    .ok_or(StorageError::NotFound)?;
    Ok(row_to_user(row))
}

pub async fn get_user_by_username(pool: &PgPool, username: &str) -> Result<UserRow, StorageError> {
    let row = sqlx::query(
        r#"SELECT user_id, username, email, password_hash, salt, public_key,
                  created_at, last_activity, online
           FROM users WHERE username = $1"#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .map_err(classify_sqlx_error)?
    .ok_or(StorageError::NotFound)?;
    Ok(row_to_user(row))
}

pub async fn update_online_status(
    pool: &PgPool,
    user_id: i64,
    online: bool,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE users SET online = $2 WHERE user_id = $1")
        .bind(user_id)
        .bind(online)
        .execute(pool)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}

pub async fn update_last_activity(pool: &PgPool, user_id: i64) -> Result<(), StorageError> {
    sqlx::query("UPDATE users SET last_activity = now() WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}

pub async fn update_last_seen_network(
    pool: &PgPool,
    user_id: i64,
    ip: &str,
    port: i32,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE users SET last_ip = $2, last_port = $3, last_activity = now() WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(ip)
    .bind(port)
    .execute(pool)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(())
}
