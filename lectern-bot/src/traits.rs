//! Capabilities the reading core needs from a messaging platform.

use async_trait::async_trait;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel not ready")]
    NotReady,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChannelError> for lectern_common::Error {
    fn from(err: ChannelError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Somewhere a rendered message segment can be delivered.
///
/// Implementations send exactly one platform message per call and return
/// the platform's identifier for it.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Send `text` to the thread or channel `thread_id`.
    async fn send(&self, thread_id: &str, text: &str) -> ChannelResult<String>;
}

/// Platforms that can open a dedicated thread for a newly loaded text.
#[async_trait]
pub trait ThreadOpener: Send + Sync {
    /// Open a public thread named `name` under `parent_id`, returning its ID.
    async fn open_thread(&self, parent_id: &str, name: &str) -> ChannelResult<String>;
}
