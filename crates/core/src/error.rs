//! Unified error type for the Mofka broker core.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the broker core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("topic already exists: {0}")]
    TopicExists(String),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("partition index {index} out of range (have {len})")]
    PartitionOutOfRange { index: usize, len: usize },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("attempted to acknowledge the sentinel event")]
    Completed,

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    pub fn topic_exists(name: impl Into<String>) -> Self {
        Self::TopicExists(name.into())
    }

    pub fn topic_not_found(name: impl Into<String>) -> Self {
        Self::TopicNotFound(name.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
}
