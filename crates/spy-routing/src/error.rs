//! Routing error types

use thiserror::Error;

use spy_core::WireError;

use crate::config::{ConfigWarning, LocationServiceKind};

/// Errors raised by the routing engine
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A frame could not be encoded or decoded
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// The configured location service has no implementation
    #[error("Location service not implemented: {0}")]
    UnsupportedLocationService(LocationServiceKind),

    /// The configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(ConfigWarning),

    /// The node's interface is down
    #[error("No SPY interfaces available")]
    NoInterfaces,
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RoutingError::UnsupportedLocationService(LocationServiceKind::Reactive);
        assert!(err.to_string().contains("reactive"));

        let err = RoutingError::InvalidConfig(ConfigWarning::ZeroQueueLength);
        assert!(err.to_string().contains("max_queue_len"));

        let err: RoutingError = WireError::UnknownMessageType(12).into();
        assert!(matches!(err, RoutingError::Wire(_)));
        assert!(RoutingError::NoInterfaces.to_string().contains("interfaces"));
    }
}
