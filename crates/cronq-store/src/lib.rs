//! Embedded job store
//!
//! SQLite-backed implementation of `cronq_core::store::JobStore` (§4.3a):
//! the scheduler's registry, run history, and per-job extension metadata
//! all live in a single local database file, opened once at startup.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteStore;

/// Database result type
pub type DbResult<T> = Result<T, DbError>;

/// Database error type
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("migration error: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("sqlite error: {0}")]
    Sqlite(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        DbError::Sqlite(e.to_string())
    }
}

impl From<DbError> for cronq_core::CronError {
    fn from(e: DbError) -> Self {
        cronq_core::CronError::StoreTransient(e.to_string())
    }
}
