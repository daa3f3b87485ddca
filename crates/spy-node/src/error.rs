//! Error types for the node driver

use thiserror::Error;

use spy_core::TransportError;
use spy_routing::RoutingError;

/// Errors that can occur while running a node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The router rejected its configuration or a request
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The node's actor has stopped
    #[error("Node is shut down")]
    Shutdown,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for NodeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        NodeError::Shutdown
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for NodeError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        NodeError::Shutdown
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
