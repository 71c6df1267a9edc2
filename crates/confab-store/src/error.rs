use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite failure.  Always aborts the surrounding unit of
    /// work; callers may retry with backoff.
    #[error("Storage failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The store could not allocate a session-scoped unit of work.
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    /// Commit or rollback attempted with no open unit of work.
    #[error("No active session")]
    NoActiveSession,

    /// A stored row could not be decoded into a domain model.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
