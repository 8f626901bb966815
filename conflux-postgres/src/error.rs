use conflux::Error as CoreError;
use thiserror::Error;

/// Errors arising from the Postgres-backed implementations in this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Error returned from the database.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// A migration step failed.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::Error),
}

/// Maps a raw `sqlx::Error` onto the core crate's [`CoreError`] variants, the way a
/// backend's errors must be interpreted by callers that only know about `conflux`'s
/// error kinds (e.g. the coordinator retrying on [`CoreError::TransientStorage`]).
pub fn map_concurrency_err(err: sqlx::Error, category: &str, stream: &str) -> CoreError {
    if is_unique_violation(&err) || is_serialization_failure(&err) {
        CoreError::UnmetWriteCondition {
            category: category.to_string(),
            stream: stream.to_string(),
        }
    } else {
        CoreError::TransientStorage(Box::new(err))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error().map(|e| e.code()), Some(Some(code)) if code == "23505")
}

fn is_serialization_failure(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error().map(|e| e.code()), Some(Some(code)) if code == "40001")
}

impl From<Error> for CoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Database(db_err) => CoreError::TransientStorage(Box::new(db_err)),
            Error::Migration(db_err) => CoreError::TransientStorage(Box::new(db_err)),
        }
    }
}
