//! # SPY Node
//!
//! Runs one [`SpyRouter`] on a tokio task.
//!
//! The router itself is synchronous and performs no I/O. [`SpyNode`] gives
//! it a [`Transport`] to read frames from and write frames to, wakes it when
//! its next timer is due, and reports deliveries and drops as
//! [`NodeEvent`]s.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spy_node::{SpyNode, NodeConfig, UdpTransport};
//!
//! let transport = Arc::new(UdpTransport::bind(addr, SPY_PORT).await?);
//! let node = SpyNode::spawn(addr, NodeConfig::default(), transport, location, mobility)?;
//!
//! let mut events = node.subscribe();
//! node.send(destination, Bytes::from_static(b"hello")).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! node.shutdown().await?;
//! ```

mod actor;
mod config;
mod error;
pub mod udp;

pub use actor::Command;
pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use udp::UdpTransport;

use std::net::Ipv4Addr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use spy_core::{
    DataPacket, DropReason, LocationService, Mobility, RoutingDecision, SystemClock, Transport,
};
use spy_routing::{RouterStats, SpyRouter};

use actor::RouterActor;

/// Something that happened to a packet at this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A packet addressed to this node arrived
    Delivered { packet: DataPacket },
    /// A packet was given up on
    ///
    /// `destination` is known for packets dropped out of the deferred queue.
    Dropped {
        destination: Option<Ipv4Addr>,
        reason: DropReason,
    },
}

/// Handle to a running router task
///
/// Dropping the handle stops the task once its command channel drains.
pub struct SpyNode {
    address: Ipv4Addr,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<NodeEvent>,
    task: JoinHandle<()>,
}

impl SpyNode {
    /// Build a router on the system clock and start driving it
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        address: Ipv4Addr,
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        location: Arc<dyn LocationService>,
        mobility: Arc<dyn Mobility>,
    ) -> NodeResult<Self> {
        let router = SpyRouter::new(
            address,
            config.router.clone(),
            Arc::new(SystemClock),
            location,
            mobility,
        )?;
        Ok(Self::with_router(router, &config, transport))
    }

    /// Start driving an already constructed router
    pub fn with_router(router: SpyRouter, config: &NodeConfig, transport: Arc<dyn Transport>) -> Self {
        let address = router.address();
        let (commands, command_rx) = mpsc::channel(config.command_channel_capacity);
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        let task = RouterActor::spawn(router, transport, events.clone(), command_rx);
        info!(node = %address, "node spawned");

        Self {
            address,
            commands,
            events,
            task,
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Subscribe to deliveries and drops
    ///
    /// Events sent before the call are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Originate a packet from this node
    pub async fn send(&self, destination: Ipv4Addr, payload: Bytes) -> NodeResult<RoutingDecision> {
        self.send_packet(DataPacket::new(self.address, destination, payload))
            .await
    }

    /// Route a caller-built packet as if originated here
    pub async fn send_packet(&self, packet: DataPacket) -> NodeResult<RoutingDecision> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Send { packet, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn stats(&self) -> NodeResult<RouterStats> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Stats { reply }).await?;
        Ok(rx.await?)
    }

    /// Addresses currently in the router's neighbor table
    pub async fn neighbors(&self) -> NodeResult<Vec<Ipv4Addr>> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Neighbors { reply }).await?;
        Ok(rx.await?)
    }

    pub async fn interface_down(&self) -> NodeResult<()> {
        Ok(self.commands.send(Command::InterfaceDown).await?)
    }

    pub async fn interface_up(&self) -> NodeResult<()> {
        Ok(self.commands.send(Command::InterfaceUp).await?)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the router task and wait for it to exit
    pub async fn shutdown(self) -> NodeResult<()> {
        // the task may already be gone; joining below still succeeds
        let _ = self.commands.send(Command::Shutdown).await;
        self.task
            .await
            .map_err(|e| NodeError::Io(std::io::Error::other(e)))?;
        info!(node = %self.address, "node stopped");
        Ok(())
    }
}

impl std::fmt::Debug for SpyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpyNode")
            .field("address", &self.address)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
