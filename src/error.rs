use thiserror::Error;

/// Custom error types for the collaboration server
#[derive(Debug, Error)]
pub enum CollabError {
    /// Room and participant management errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Role {0} is not permitted to perform this operation")]
    Unauthorized(String),

    /// Signaling errors
    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// External service errors
    #[error("Execution gateway error: {0}")]
    ExecutionGateway(String),

    #[error("Remark store error: {0}")]
    RemarkStore(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience type alias for Results using CollabError
pub type Result<T> = std::result::Result<T, CollabError>;

impl CollabError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        CollabError::Internal(msg.into())
    }

    /// Helper to create execution gateway errors
    pub fn gateway(msg: impl Into<String>) -> Self {
        CollabError::ExecutionGateway(msg.into())
    }

    /// Helper to create remark store errors
    pub fn store(msg: impl Into<String>) -> Self {
        CollabError::RemarkStore(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CollabError::RoomNotFound("test-room".to_string());
        assert_eq!(err.to_string(), "Room test-room not found");
    }

    #[test]
    fn test_error_helpers() {
        let err = CollabError::internal("Something went wrong");
        assert!(matches!(err, CollabError::Internal(_)));

        let err = CollabError::gateway("connection refused");
        assert!(matches!(err, CollabError::ExecutionGateway(_)));
    }
}
