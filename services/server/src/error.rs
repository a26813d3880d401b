//! Typed error enums per layer, converted at the router boundary into the
//! wire-level [`msg_protocol::ErrorKind`] categories from §7.

use msg_protocol::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("a row already exists with this unique key")]
    Conflict,
    #[error("no matching row")]
    NotFound,
    #[error("a foreign key or check constraint was violated")]
    Constraint,
    #[error("storage io error: {0}")]
    Io(#[from] sqlx::Error),
}

impl From<&StorageError> for ErrorKind {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::Conflict => ErrorKind::Conflict,
            StorageError::NotFound => ErrorKind::Constraint,
            StorageError::Constraint => ErrorKind::Constraint,
            StorageError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Classifies a raw `sqlx::Error` into the storage layer's sum result,
/// per §4.B: storage never panics the process on data errors.
pub fn classify_sqlx_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => return StorageError::Conflict,   // unique_violation
            Some("23503") => return StorageError::Constraint, // foreign_key_violation
            Some("23514") => return StorageError::Constraint, // check_violation
            _ => {}
        }
    }
    if matches!(err, sqlx::Error::RowNotFound) {
        return StorageError::NotFound;
    }
    StorageError::Io(err)
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("username must be 1-{max} characters with no whitespace")]
    InvalidUsername { max: usize },
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },
    #[error("public key is not a well-formed PEM block")]
    MalformedPublicKey,
    #[error("username exists")]
    UsernameTaken,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("password hashing failed")]
    HashingFailed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<&AuthError> for ErrorKind {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::UsernameTaken => ErrorKind::Conflict,
            AuthError::BadCredentials => ErrorKind::Unauthorized,
            AuthError::InvalidUsername { .. }
            | AuthError::WeakPassword { .. }
            | AuthError::MalformedPublicKey => ErrorKind::ProtocolMalformed,
            AuthError::HashingFailed => ErrorKind::Internal,
            AuthError::Storage(e) => ErrorKind::from(e),
        }
    }
}

