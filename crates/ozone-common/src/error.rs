//! Error types shared across the Ozone core.

use thiserror::Error;

/// Common result type for Ozone operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Ozone components
#[derive(Debug, Error)]
pub enum Error {
    // Cluster / placement errors
    #[error("insufficient nodes for placement: have {available}, need {required}")]
    InsufficientNodes { available: usize, required: usize },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("datanode registration rejected: {0}")]
    InvalidRegistration(String),

    // Container errors
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("container already exists: {0}")]
    ContainerAlreadyExists(String),

    #[error("invalid container state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("container is closed: {0}")]
    ContainerClosed(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("chunk not found: {0}")]
    ChunkNotFound(String),

    // Data-plane errors
    #[error("container command failed: {result}: {message}")]
    ContainerCommand { result: i32, message: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("stream is closed")]
    StreamClosed,

    // Transport and storage
    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound(_)
                | Self::BlockNotFound(_)
                | Self::NodeNotFound(_)
                | Self::KeyNotFound(_)
                | Self::ChunkNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::ContainerNotFound("c1".into()).is_not_found());
        assert!(!Error::Rpc("boom".into()).is_not_found());
    }
}
