use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Bad recurrence parameters. Raised before anything is enqueued.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No schedule entry with the given ID exists in the store.
    #[error("Schedule entry not found: {id}")]
    EntryNotFound { id: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
