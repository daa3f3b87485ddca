//! Mock transport implementation for testing
//!
//! Provides an in-memory link layer for testing the node driver without
//! real sockets. A link between two transports means they are in radio
//! range of each other; broadcasts reach every linked transport.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use spy_core::{MockTransportBuilder, Transport};
//!
//! let builder = MockTransportBuilder::new();
//! let (a, b) = builder.create_connected_pair(addr_a, addr_b);
//!
//! a.send_to(addr_b, Bytes::from_static(b"frame")).await?;
//! let (sender, data) = b.recv().await?;
//! assert_eq!(sender, addr_a);
//! ```

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};

use crate::error::TransportError;
use crate::transport::Transport;

/// Datagram in flight on a mock link
#[derive(Debug, Clone)]
pub struct MockDatagram {
    pub sender: Ipv4Addr,
    pub data: Bytes,
}

/// A mock transport for testing
pub struct MockTransport {
    local_addr: Ipv4Addr,
    /// Linked neighbors (address -> their inbox)
    links: DashMap<Ipv4Addr, mpsc::Sender<MockDatagram>>,
    inbox_rx: Mutex<mpsc::Receiver<MockDatagram>>,
    inbox_tx: mpsc::Sender<MockDatagram>,
}

impl MockTransport {
    /// Create a new unlinked transport
    pub fn new(local_addr: Ipv4Addr) -> Self {
        Self::with_buffer_size(local_addr, 1024)
    }

    /// Create a new transport with a specific inbox size
    pub fn with_buffer_size(local_addr: Ipv4Addr, buffer_size: usize) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(buffer_size);
        Self {
            local_addr,
            links: DashMap::new(),
            inbox_rx: Mutex::new(inbox_rx),
            inbox_tx,
        }
    }

    /// Sender half of this transport's inbox
    pub fn inbox_sender(&self) -> mpsc::Sender<MockDatagram> {
        self.inbox_tx.clone()
    }

    /// Add a one-way link to a neighbor
    pub fn link_to(&self, peer: Ipv4Addr, peer_inbox: mpsc::Sender<MockDatagram>) {
        self.links.insert(peer, peer_inbox);
    }

    /// Remove the link to a neighbor
    pub fn unlink(&self, peer: Ipv4Addr) {
        self.links.remove(&peer);
    }

    pub fn is_linked(&self, peer: Ipv4Addr) -> bool {
        self.links.contains_key(&peer)
    }

    /// All linked neighbors, sorted by address
    pub fn linked_peers(&self) -> Vec<Ipv4Addr> {
        let mut peers: Vec<Ipv4Addr> = self.links.iter().map(|entry| *entry.key()).collect();
        peers.sort();
        peers
    }

    async fn deliver(
        &self,
        sender: mpsc::Sender<MockDatagram>,
        data: Bytes,
    ) -> Result<(), TransportError> {
        let datagram = MockDatagram {
            sender: self.local_addr,
            data,
        };
        sender
            .send(datagram)
            .await
            .map_err(|_| TransportError::SendFailed("channel closed".into()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    async fn send_to(&self, dest: Ipv4Addr, data: Bytes) -> Result<(), TransportError> {
        if dest.is_broadcast() {
            // collect first so no map guard is held across an await
            let targets: Vec<_> = self.links.iter().map(|entry| entry.value().clone()).collect();
            for target in targets {
                // a neighbor that went away does not fail the broadcast
                let _ = self.deliver(target, data.clone()).await;
            }
            return Ok(());
        }

        let target = self
            .links
            .get(&dest)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownAddress(dest.to_string()))?;
        self.deliver(target, data).await
    }

    async fn recv(&self) -> Result<(Ipv4Addr, Bytes), TransportError> {
        let mut inbox = self.inbox_rx.lock().await;
        let datagram = inbox
            .recv()
            .await
            .ok_or_else(|| TransportError::ReceiveFailed("channel closed".into()))?;
        Ok((datagram.sender, datagram.data))
    }

    async fn try_recv(&self) -> Result<Option<(Ipv4Addr, Bytes)>, TransportError> {
        let mut inbox = self.inbox_rx.lock().await;
        match inbox.try_recv() {
            Ok(datagram) => Ok(Some((datagram.sender, datagram.data))),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(TransportError::ReceiveFailed("channel disconnected".into()))
            }
        }
    }
}

/// Builder for creating linked mock transports
pub struct MockTransportBuilder {
    buffer_size: usize,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransportBuilder {
    pub fn new() -> Self {
        Self { buffer_size: 1024 }
    }

    /// Set the inbox size for every created transport
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    fn create(&self, addrs: &[Ipv4Addr]) -> HashMap<Ipv4Addr, MockTransport> {
        addrs
            .iter()
            .map(|addr| (*addr, MockTransport::with_buffer_size(*addr, self.buffer_size)))
            .collect()
    }

    /// Create two transports in range of each other
    pub fn create_connected_pair(&self, a: Ipv4Addr, b: Ipv4Addr) -> (MockTransport, MockTransport) {
        let transport_a = MockTransport::with_buffer_size(a, self.buffer_size);
        let transport_b = MockTransport::with_buffer_size(b, self.buffer_size);
        transport_a.link_to(b, transport_b.inbox_sender());
        transport_b.link_to(a, transport_a.inbox_sender());
        (transport_a, transport_b)
    }

    /// Create transports that are all in range of each other
    pub fn create_full_mesh(&self, addrs: &[Ipv4Addr]) -> HashMap<Ipv4Addr, MockTransport> {
        let transports = self.create(addrs);
        for (a, transport_a) in &transports {
            for (b, transport_b) in &transports {
                if a != b {
                    transport_a.link_to(*b, transport_b.inbox_sender());
                }
            }
        }
        transports
    }

    /// Create a line where each transport only reaches its neighbors in the list
    pub fn create_chain(&self, addrs: &[Ipv4Addr]) -> HashMap<Ipv4Addr, MockTransport> {
        let transports = self.create(addrs);
        for pair in addrs.windows(2) {
            if let (Some(a), Some(b)) = (transports.get(&pair[0]), transports.get(&pair[1])) {
                a.link_to(pair[1], b.inbox_sender());
                b.link_to(pair[0], a.inbox_sender());
            }
        }
        transports
    }
}

/// A set of mock transports whose links can be cut and restored
pub struct MockNetwork {
    transports: HashMap<Ipv4Addr, Arc<MockTransport>>,
}

impl MockNetwork {
    pub fn full_mesh(addrs: &[Ipv4Addr]) -> Self {
        Self::from_transports(MockTransportBuilder::new().create_full_mesh(addrs))
    }

    pub fn chain(addrs: &[Ipv4Addr]) -> Self {
        Self::from_transports(MockTransportBuilder::new().create_chain(addrs))
    }

    fn from_transports(transports: HashMap<Ipv4Addr, MockTransport>) -> Self {
        Self {
            transports: transports
                .into_iter()
                .map(|(addr, transport)| (addr, Arc::new(transport)))
                .collect(),
        }
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<Arc<MockTransport>> {
        self.transports.get(&addr).cloned()
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        let mut addrs: Vec<_> = self.transports.keys().copied().collect();
        addrs.sort();
        addrs
    }

    /// Cut the link between two transports in both directions
    pub fn cut(&self, a: Ipv4Addr, b: Ipv4Addr) {
        if let Some(transport) = self.transports.get(&a) {
            transport.unlink(b);
        }
        if let Some(transport) = self.transports.get(&b) {
            transport.unlink(a);
        }
    }

    /// Restore a link in both directions
    pub fn link(&self, a: Ipv4Addr, b: Ipv4Addr) {
        if let (Some(ta), Some(tb)) = (self.transports.get(&a), self.transports.get(&b)) {
            ta.link_to(b, tb.inbox_sender());
            tb.link_to(a, ta.inbox_sender());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[tokio::test]
    async fn test_mock_transport_send_recv() {
        let (a, b) = MockTransportBuilder::new().create_connected_pair(addr(1), addr(2));

        assert_ok!(a.send_to(addr(2), Bytes::from_static(b"frame")).await);

        let (sender, data) = assert_ok!(b.recv().await);
        assert_eq!(sender, addr(1));
        assert_eq!(&data[..], b"frame");
    }

    #[tokio::test]
    async fn test_mock_transport_unknown_neighbor() {
        let a = MockTransport::new(addr(1));
        let result = a.send_to(addr(9), Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(TransportError::UnknownAddress(_))));
    }

    #[tokio::test]
    async fn test_mock_transport_broadcast_reaches_links_only() {
        let transports = MockTransportBuilder::new().create_chain(&[addr(1), addr(2), addr(3)]);
        let middle = &transports[&addr(2)];

        middle.broadcast(Bytes::from_static(b"hello")).await.unwrap();

        let (sender, _) = transports[&addr(1)].recv().await.unwrap();
        assert_eq!(sender, addr(2));
        let (sender, _) = transports[&addr(3)].recv().await.unwrap();
        assert_eq!(sender, addr(2));

        // the ends of the chain are out of range of each other
        transports[&addr(1)].broadcast(Bytes::from_static(b"hi")).await.unwrap();
        assert!(transports[&addr(3)].try_recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_transport_try_recv() {
        let (a, b) = MockTransportBuilder::new().create_connected_pair(addr(1), addr(2));
        assert!(b.try_recv().await.unwrap().is_none());

        a.send_to(addr(2), Bytes::from_static(b"x")).await.unwrap();
        let (sender, data) = b.try_recv().await.unwrap().unwrap();
        assert_eq!(sender, addr(1));
        assert_eq!(&data[..], b"x");
    }

    #[tokio::test]
    async fn test_mock_network_cut_and_link() {
        let network = MockNetwork::full_mesh(&[addr(1), addr(2), addr(3)]);
        let a = network.get(addr(1)).unwrap();
        assert_eq!(a.linked_peers(), vec![addr(2), addr(3)]);

        network.cut(addr(1), addr(3));
        assert!(!a.is_linked(addr(3)));
        assert!(a.send_to(addr(3), Bytes::new()).await.is_err());

        network.link(addr(1), addr(3));
        assert!(a.is_linked(addr(3)));
        a.send_to(addr(3), Bytes::new()).await.unwrap();
        let (sender, _) = network.get(addr(3)).unwrap().recv().await.unwrap();
        assert_eq!(sender, addr(1));
    }

    #[test]
    fn test_chain_links() {
        let transports = MockTransportBuilder::new().create_chain(&[addr(1), addr(2), addr(3)]);
        assert!(transports[&addr(1)].is_linked(addr(2)));
        assert!(!transports[&addr(1)].is_linked(addr(3)));
        assert_eq!(transports[&addr(2)].linked_peers(), vec![addr(1), addr(3)]);
    }
}
