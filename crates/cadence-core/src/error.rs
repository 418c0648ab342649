use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    /// The config file or an env override could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CadenceError {
    /// Short error code string, logged alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            CadenceError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
