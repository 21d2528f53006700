//! Error types for the deployment sync service

/// Errors that can occur in the deployment sync service
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any list-read or write failure against the deployments API
    #[error("Transport error: {0}")]
    Transport(String),

    /// Push subscription setup failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed push channel frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for deployment sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
