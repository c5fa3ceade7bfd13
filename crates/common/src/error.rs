//! Error types for Spacedrop

use thiserror::Error;

/// Result type alias using Spacedrop Error
pub type Result<T> = std::result::Result<T, Error>;

/// Spacedrop error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Operation timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Home directory could not be determined")]
    HomeNotFound,
}

impl Error {
    /// Shorthand for a failed external command
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }
}
