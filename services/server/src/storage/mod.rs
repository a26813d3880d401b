//! Transactional relational store (§4.B). Every write runs inside a
//! transaction; every operation returns `Result<T, StorageError>` rather
//! than panicking on data errors.

pub mod backups;
pub mod blocks;
pub mod contacts;
pub mod groups;
pub mod messages;
pub mod sessions;
pub mod users;

pub use crate::error::StorageError;

/// Resolves a `get_history` / contact-CRUD `target` field: if it parses as
/// an integer it's treated as a `user_id`, otherwise it's looked up as a
/// `username`. Per §4.B, an unresolvable target yields "not found" rather
/// than an error for history lookups; callers that need a hard error (e.g.
/// `add_contact`) check the `Option` themselves.
pub async fn resolve_user_ref(
    pool: &sqlx::PgPool,
    target: &str,
) -> Result<Option<i64>, StorageError> {
    if let Ok(id) = target.parse::<i64>() {
        return Ok(Some(id));
    }
    match users::get_user_by_username(pool, target).await {
        Ok(user) => Ok(Some(user.user_id)),
        Err(StorageError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}
