//! Transport abstraction for control-port datagrams
//!
//! The [`Transport`] trait provides a unified interface for sending and
//! receiving SPY frames between one-hop neighbors. This allows the node
//! driver to work with both a real UDP socket and in-memory channels for
//! testing.
//!
//! ## Implementations
//!
//! - [`MockTransport`](crate::MockTransport): In-memory transport for testing
//! - `UdpTransport`: Real UDP socket on the control port (in spy-node)

use std::net::Ipv4Addr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Datagram transport between one-hop neighbors
///
/// Sending to [`Ipv4Addr::BROADCAST`] reaches every neighbor in radio
/// range.
///
/// # Example
///
/// ```rust,ignore
/// use spy_core::{Transport, TransportError};
///
/// async fn announce<T: Transport>(transport: &T, frame: Bytes) -> Result<(), TransportError> {
///     transport.broadcast(frame).await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address this transport sends from
    fn local_addr(&self) -> Ipv4Addr;

    /// Send a frame to a neighbor, or to all neighbors for the broadcast address
    ///
    /// # Errors
    ///
    /// Returns an error if the neighbor is unknown to the link or sending fails.
    async fn send_to(&self, dest: Ipv4Addr, data: Bytes) -> Result<(), TransportError>;

    /// Receive the next frame
    ///
    /// Blocks until data is available or an error occurs.
    ///
    /// # Returns
    ///
    /// A tuple of (sender address, frame)
    async fn recv(&self) -> Result<(Ipv4Addr, Bytes), TransportError>;

    /// Send a frame to every neighbor in range
    async fn broadcast(&self, data: Bytes) -> Result<(), TransportError> {
        self.send_to(Ipv4Addr::BROADCAST, data).await
    }

    /// Try to receive a frame without blocking
    ///
    /// Returns `Ok(None)` if no data is immediately available.
    async fn try_recv(&self) -> Result<Option<(Ipv4Addr, Bytes)>, TransportError> {
        match tokio::time::timeout(std::time::Duration::ZERO, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_object_safe() {
        fn assert_dyn(_: Option<&dyn Transport>) {}
        assert_dyn(None);
    }
}
