use thiserror::Error;

/// Errors produced by the store layer.
///
/// The first group is the caller-facing taxonomy; everything from `Sqlite`
/// down is an infrastructure failure that callers should treat as opaque.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No principal could be resolved from the request context.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The principal lacks the participancy or role the operation needs.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// `mark_read` on a conversation the caller has not joined.
    #[error("Not a participant in this conversation")]
    NotAParticipant,

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Input rejected before touching storage.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// SQLite / SQLCipher error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

impl StoreError {
    /// Map `QueryReturnedNoRows` to [`StoreError::NotFound`] for the named entity.
    pub(crate) fn not_found(entity: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
        move |e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(entity),
            other => StoreError::Sqlite(other),
        }
    }

    /// True for infrastructure failures that carry no caller-facing meaning.
    pub fn is_internal(&self) -> bool {
        !matches!(
            self,
            StoreError::NotAuthenticated
                | StoreError::Forbidden(_)
                | StoreError::NotAParticipant
                | StoreError::NotFound(_)
                | StoreError::Validation(_)
                | StoreError::Conflict(_)
        )
    }
}

/// True when `err` is a UNIQUE / PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
