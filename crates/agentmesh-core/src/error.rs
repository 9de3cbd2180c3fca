//! Error types for mesh operations

use thiserror::Error;

/// Result type for mesh operations
pub type MeshResult<T> = std::result::Result<T, MeshError>;

/// Errors that can occur in the mesh core
#[derive(Debug, Error)]
pub enum MeshError {
    /// No live connection for the given session
    #[error("Session not connected: {0}")]
    SessionNotConnected(String),

    /// Connection not found in the registry
    #[error("Connection not found: {0}")]
    ConnectionNotFound(uuid::Uuid),

    /// Live transport delivery failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Durable store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed or invalid message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
