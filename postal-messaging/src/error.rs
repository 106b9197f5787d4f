//! Error types for messaging operations

use postal_mail::MailError;
use postal_pool::PoolError;
use thiserror::Error;

/// Errors that can occur during messaging operations
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Failed to publish a message
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Failed to fetch a message
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Failed to commit an offset
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Failed to serialize a message
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a message
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Reader or writer is closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Message was already tried `max_retries` times
    #[error("message exceeded max retries")]
    RetriesExceeded {
        message_id: String,
        retry_count: u32,
        max_retries: u32,
    },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Worker pool rejected the job
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Email delivery failed
    #[error(transparent)]
    Mail(#[from] MailError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl MessagingError {
    /// Check if the operation may succeed when tried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Publish(_) | Self::Fetch(_) | Self::Commit(_) => true,
            Self::Pool(e) => matches!(e, PoolError::QueueFull),
            Self::Mail(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

/// Result type for messaging operations
pub type Result<T> = std::result::Result<T, MessagingError>;
