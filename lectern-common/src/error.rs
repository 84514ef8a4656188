//! Error types for Lectern.

use thiserror::Error;

/// Result type alias using the Lectern error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Lectern.
///
/// `Validation` and `NotFound` never mutate session state. `Transport`
/// wraps a failed send and is surfaced to callers of manual operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input (chunk size, time of day, jump target, empty text)
    #[error("{0}")]
    Validation(String),

    /// No reading session for the calling thread
    #[error("{0}")]
    NotFound(String),

    /// The send primitive failed
    #[error("Delivery failed: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether this error came from the send primitive.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_passed_through() {
        let err = Error::validation("Chunk size must be between 1 and 50");
        assert_eq!(err.to_string(), "Chunk size must be between 1 and 50");
        assert!(!err.is_transport());
    }

    #[test]
    fn transport_is_flagged() {
        let err = Error::transport("403 Missing Access");
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Delivery failed: 403 Missing Access");
    }
}
