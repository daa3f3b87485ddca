//! UDP transport on the SPY control port
//!
//! Every node sends and listens on the same port. A datagram addressed to
//! the broadcast address reaches every neighbor on the link; unicast frames
//! go to `neighbor:port`. Datagrams are atomic, so no framing is needed.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use spy_core::{Transport, TransportError};

/// Size of the receive buffer for `UdpSocket::recv_from`
pub const UDP_RECV_BUFFER: usize = 65_535;

/// A [`Transport`] over a broadcast-enabled UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: Ipv4Addr,
    port: u16,
}

impl UdpTransport {
    /// Listen on every interface at `port`, sending as `local_addr`
    pub async fn bind(local_addr: Ipv4Addr, port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).await?;
        Self::from_socket(socket, local_addr)
    }

    /// Listen on exactly `addr`
    ///
    /// Port 0 picks a free port; peers must then be told which one.
    pub async fn bind_addr(addr: SocketAddrV4) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket, *addr.ip())
    }

    fn from_socket(socket: UdpSocket, local_addr: Ipv4Addr) -> Result<Self, TransportError> {
        socket.set_broadcast(true)?;
        let port = socket.local_addr()?.port();
        info!(addr = %local_addr, port, "UDP transport bound");
        Ok(Self {
            socket,
            local_addr,
            port,
        })
    }

    /// Port every peer is reached on
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    async fn send_to(&self, dest: Ipv4Addr, data: Bytes) -> Result<(), TransportError> {
        let target = SocketAddrV4::new(dest, self.port);
        let sent = self.socket.send_to(&data, target).await?;
        if sent != data.len() {
            return Err(TransportError::SendFailed(format!(
                "short write to {target}: {sent} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(Ipv4Addr, Bytes), TransportError> {
        let mut buf = vec![0u8; UDP_RECV_BUFFER];
        loop {
            let (n, src) = self.socket.recv_from(&mut buf).await?;
            match src {
                SocketAddr::V4(src) => {
                    buf.truncate(n);
                    return Ok((*src.ip(), Bytes::from(buf)));
                }
                SocketAddr::V6(src) => debug!(src = %src, "ignoring IPv6 datagram"),
            }
        }
    }
}
