use thiserror::Error;

/// Errors raised by schedule operations.
///
/// Every variant is a synchronous, local failure: the operation that raised it
/// left the schedule state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A configuration value was rejected (empty workload name, bad interval, …).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation is not permitted in the schedule's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ScheduleError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ScheduleError::Validation(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        ScheduleError::InvalidState(msg.into())
    }

    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::Validation(_) => "VALIDATION_ERROR",
            ScheduleError::InvalidState(_) => "INVALID_STATE",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
