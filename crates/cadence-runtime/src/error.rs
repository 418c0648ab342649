use cadence_schedule::ScheduleError;
use thiserror::Error;

/// Errors raised by the schedule host and its signal queue.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A persisted record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The schedule operation itself was rejected.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// No schedule with the given ID exists in the store.
    #[error("Schedule not found: {id}")]
    NotFound { id: String },

    /// A launch named a workload nobody registered.
    #[error("Unknown workload: {name}")]
    UnknownWorkload { name: String },
}

impl RuntimeError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::Database(_) => "DATABASE_ERROR",
            RuntimeError::Serialization(_) => "SERIALIZATION_ERROR",
            RuntimeError::Schedule(e) => e.code(),
            RuntimeError::NotFound { .. } => "SCHEDULE_NOT_FOUND",
            RuntimeError::UnknownWorkload { .. } => "UNKNOWN_WORKLOAD",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
