//! Error types for the persistence and scheduling surfaces
//!
//! The analysis pipeline itself reports failures through `anyhow`.

use thiserror::Error;

/// Errors raised by the analysis store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("database connection lock poisoned")]
    LockPoisoned,

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },
}

/// Errors raised by the batch scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
