//! The task that owns a router
//!
//! Handles:
//! - Datagrams arriving on the transport
//! - Router timers (HELLO, queue drain, parity check)
//! - Commands from the [`SpyNode`](crate::SpyNode) handle
//!
//! After every wake-up the router's outbound effects are flushed to the
//! transport before the next event is taken, so effects leave in the order
//! the router produced them.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use spy_core::{DataPacket, RoutingDecision, Transport};
use spy_routing::{Outbound, RouterStats, SpyRouter};

use crate::NodeEvent;

/// Sleep used when the router has no pending timer
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// Requests handled by the actor
#[derive(Debug)]
pub enum Command {
    /// Route a locally originated packet
    Send {
        packet: DataPacket,
        reply: oneshot::Sender<RoutingDecision>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
    /// Addresses currently in the neighbor table
    Neighbors {
        reply: oneshot::Sender<Vec<Ipv4Addr>>,
    },
    InterfaceDown,
    InterfaceUp,
    Shutdown,
}

pub(crate) struct RouterActor {
    router: SpyRouter,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<NodeEvent>,
}

impl RouterActor {
    pub(crate) fn spawn(
        router: SpyRouter,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<NodeEvent>,
        commands: mpsc::Receiver<Command>,
    ) -> JoinHandle<()> {
        let span = info_span!("spy_node", node = %router.address());
        let actor = Self {
            router,
            transport,
            events,
        };
        tokio::spawn(actor.run(commands).instrument(span))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.router.start();
        self.flush().await;
        info!("router actor started");

        loop {
            let wake_at = self
                .router
                .next_deadline()
                .map(Instant::from_std)
                .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.on_command(command).await,
                    }
                }
                received = self.transport.recv() => {
                    match received {
                        Ok((from, frame)) => self.on_datagram(from, frame).await,
                        Err(e) => warn!(error = %e, "transport receive error"),
                    }
                }
                _ = tokio::time::sleep_until(wake_at) => {
                    let fired = self.router.poll_timers();
                    trace!(timers = ?fired, "timers fired");
                }
            }

            self.flush().await;
        }

        info!("router actor stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send { packet, reply } => {
                let decision = self.router.route_output(packet);
                self.apply(decision.clone()).await;
                let _ = reply.send(decision);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.router.stats());
            }
            Command::Neighbors { reply } => {
                let _ = reply.send(self.router.table().neighbors());
            }
            Command::InterfaceDown => self.router.interface_down(),
            Command::InterfaceUp => self.router.interface_up(),
            // handled by the run loop
            Command::Shutdown => {}
        }
    }

    async fn on_datagram(&mut self, from: Ipv4Addr, frame: Bytes) {
        match self.router.handle_datagram(from, &frame) {
            Ok(Some(decision)) => self.apply(decision).await,
            Ok(None) => {}
            Err(e) => debug!(from = %from, error = %e, "datagram not handled"),
        }
    }

    /// Carry out a decision returned directly by the router
    async fn apply(&mut self, decision: RoutingDecision) {
        match decision {
            RoutingDecision::Forward { next_hop, packet } => self.transmit_packet(next_hop, &packet).await,
            RoutingDecision::Deliver { packet } => {
                info!(src = %packet.source, len = packet.payload.len(), "packet delivered");
                let _ = self.events.send(NodeEvent::Delivered { packet });
            }
            RoutingDecision::Drop { reason } => {
                let _ = self.events.send(NodeEvent::Dropped {
                    destination: None,
                    reason,
                });
            }
            RoutingDecision::Deferred => {}
        }
    }

    async fn transmit_packet(&self, next_hop: Ipv4Addr, packet: &DataPacket) {
        match packet.encode() {
            Ok(frame) => self.transmit(next_hop, frame).await,
            Err(e) => warn!(dst = %packet.destination, error = %e, "packet not encodable"),
        }
    }

    async fn transmit(&self, dest: Ipv4Addr, frame: Bytes) {
        if let Err(e) = self.transport.send_to(dest, frame).await {
            warn!(dest = %dest, error = %e, "send failed");
        }
    }

    /// Send everything the router queued since the last flush
    async fn flush(&mut self) {
        for effect in self.router.take_outbound() {
            match effect {
                Outbound::Dropped { packet, reason } => {
                    let _ = self.events.send(NodeEvent::Dropped {
                        destination: Some(packet.destination),
                        reason,
                    });
                }
                Outbound::Forward { next_hop, packet } => {
                    self.transmit_packet(next_hop, &packet).await;
                }
                Outbound::Control { dest, message } => match message.encode() {
                    Ok(frame) => self.transmit(dest, frame).await,
                    Err(e) => warn!(dest = %dest, error = %e, "control frame not encodable"),
                },
            }
        }
    }
}
