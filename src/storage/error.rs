use rusqlite::ffi::ErrorCode;

/// Storage failures, tagged transient or permanent so the retry wrapper never
/// has to know about SQLite result codes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lock contention. Worth retrying.
    #[error("database busy: {0}")]
    Busy(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sentiment score {0} is outside [0, 1]")]
    InvalidScore(f64),

    #[error("storage worker failed: {0}")]
    Worker(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<StoreError>,
    },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::Busy(err.to_string())
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Worker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_locked_are_transient() {
        assert!(StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY)).is_transient());
        assert!(StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED)).is_transient());
    }

    #[test]
    fn constraint_violation_is_permanent() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT));
        assert!(!err.is_transient());
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
