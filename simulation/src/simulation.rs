//! Simulation engine for SPY
//!
//! Drives one [`SpyRouter`] per node under a shared [`ManualClock`]:
//! - time advances in fixed steps; every router's due timers fire each step
//! - frames a router emits are carried to the nodes within radio range
//! - frames can be lost with a configured probability
//! - every transmission, delivery and drop is recorded as a [`SimEvent`]
//!
//! Node positions are published into an oracle [`LocationRegistry`], and
//! each router reads its own position back from the same registry, so
//! [`Simulation::move_node`] is seen both by the moving node and by every
//! location lookup.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, info, trace, warn};
use uuid::Uuid;

use spy_core::{
    DataPacket, DropReason, LocationRegistry, ManualClock, MessageType, Mobility,
    OracleLocationService, Position, RoutingDecision, peek_type,
};
use spy_logging::{NodeContextGuard, NodeKind};
use spy_routing::{Outbound, RouterStats, SpyConfig, SpyRouter};

use crate::topology::Topology;
use crate::types::{FrameKind, PacketId, SimError, SimEvent, SimResult};

/// A frame on the air: sender, link-layer destination, encoded bytes
type Frame = (Ipv4Addr, Ipv4Addr, Bytes);

/// Configuration for the simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Protocol parameters shared by every router
    pub router: SpyConfig,
    /// Simulated time advanced per step
    pub step: Duration,
    /// Probability each receiver misses a frame
    pub loss_probability: f64,
    /// Seed for frame loss and for each router's jitter
    pub seed: u64,
    /// Frames carried in one flush before forwarding is assumed to loop
    pub max_frames_per_flush: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            router: SpyConfig::default(),
            step: Duration::from_millis(10),
            loss_probability: 0.0,
            seed: 0,
            max_frames_per_flush: 100_000,
        }
    }
}

impl SimConfig {
    pub fn with_router(mut self, router: SpyConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss_probability = probability.clamp(0.0, 1.0);
        self
    }
}

/// Simulation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimStats {
    pub originated: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub drops_by_reason: HashMap<DropReason, u64>,
    /// Data transmissions of delivered packets
    pub total_hops: u64,
    /// Origination to delivery, summed over delivered packets
    pub total_latency: Duration,
    pub frames_transmitted: u64,
    pub frames_lost: u64,
    /// HELLOs and shortcut-discovery frames
    pub control_frames: u64,
}

impl SimStats {
    pub fn delivery_ratio(&self) -> f64 {
        if self.originated == 0 {
            0.0
        } else {
            self.delivered as f64 / self.originated as f64
        }
    }

    pub fn average_hops(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_hops as f64 / self.delivered as f64
        }
    }

    pub fn average_latency(&self) -> Duration {
        match u32::try_from(self.delivered) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_latency / n,
        }
    }

    pub fn drops(&self, reason: DropReason) -> u64 {
        self.drops_by_reason.get(&reason).copied().unwrap_or(0)
    }
}

/// Own position read back from the shared registry
struct RegistryMobility {
    registry: LocationRegistry,
    address: Ipv4Addr,
    home: Position,
}

impl Mobility for RegistryMobility {
    fn position(&self) -> Position {
        self.registry
            .get(self.address)
            .map(|record| record.position)
            .unwrap_or(self.home)
    }
}

struct Station {
    router: SpyRouter,
    instance_id: Uuid,
}

/// Tracking for a packet the simulation originated
#[derive(Debug, Clone, Copy)]
struct InFlight {
    originated: Duration,
    hops: u64,
    delivered: bool,
}

/// The simulation state
pub struct Simulation {
    config: SimConfig,
    clock: ManualClock,
    registry: LocationRegistry,
    topology: Topology,
    stations: BTreeMap<Ipv4Addr, Station>,
    rng: StdRng,
    next_packet: u64,
    in_flight: BTreeMap<PacketId, InFlight>,
    started: bool,
    /// Everything observed so far, in order
    pub event_log: Vec<SimEvent>,
    pub stats: SimStats,
}

impl Simulation {
    /// Build one router per node of `topology`
    pub fn new(topology: Topology, config: SimConfig) -> SimResult<Self> {
        let clock = ManualClock::new();
        let registry = LocationRegistry::new();
        let mut stations = BTreeMap::new();

        for (address, position) in topology.nodes() {
            registry.publish(address, position, 0);
            let mobility = RegistryMobility {
                registry: registry.clone(),
                address,
                home: position,
            };
            let router = SpyRouter::new(
                address,
                config.router.clone(),
                Arc::new(clock.clone()),
                Arc::new(OracleLocationService::new(registry.clone())),
                Arc::new(mobility),
            )?
            .with_rng_seed(config.seed ^ u64::from(u32::from(address)));

            stations.insert(
                address,
                Station {
                    router,
                    instance_id: Uuid::new_v4(),
                },
            );
        }

        info!(
            nodes = stations.len(),
            range = topology.range(),
            seed = config.seed,
            "simulation created"
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            clock,
            registry,
            topology,
            stations,
            next_packet: 0,
            in_flight: BTreeMap::new(),
            started: false,
            event_log: Vec::new(),
            stats: SimStats::default(),
        })
    }

    /// Arm every router's HELLO timer; later calls do nothing
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for address in self.addresses() {
            self.with_router(address, |router| router.start());
        }
        self.flush();
    }

    /// Advance one step: fire due timers, then carry the resulting frames
    pub fn step(&mut self) {
        self.start();
        self.clock.advance(self.config.step);
        for address in self.addresses() {
            let fired = self.with_router(address, |router| router.poll_timers());
            if let Some(fired) = fired.filter(|f| !f.is_empty()) {
                trace!(node = %address, timers = ?fired, "timers fired");
            }
        }
        self.flush();
    }

    /// Step until `duration` of simulated time has passed
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.elapsed() + duration;
        while self.elapsed() < end {
            self.step();
        }
    }

    /// Originate a packet at `from` and carry it as far as it goes right now
    ///
    /// The returned id prefixes the payload, so deliveries of this packet
    /// show up under the same id in the event log.
    pub fn send(&mut self, from: Ipv4Addr, to: Ipv4Addr, payload: &[u8]) -> SimResult<PacketId> {
        if !self.stations.contains_key(&from) {
            return Err(SimError::UnknownNode(from));
        }
        self.start();

        let id = PacketId(self.next_packet);
        self.next_packet += 1;

        let mut body = Vec::with_capacity(PacketId::LEN + payload.len());
        body.extend_from_slice(&id.to_bytes());
        body.extend_from_slice(payload);
        let packet = DataPacket::new(from, to, body);

        let at = self.elapsed();
        self.stats.originated += 1;
        self.in_flight.insert(
            id,
            InFlight {
                originated: at,
                hops: 0,
                delivered: false,
            },
        );
        self.record(SimEvent::Originated {
            at,
            packet: id,
            source: from,
            destination: to,
        });

        let decision = self.with_router(from, |router| router.route_output(packet));
        let mut wire = VecDeque::new();
        if let Some(decision) = decision {
            debug!(packet = %id, src = %from, dst = %to, decision = ?decision, "packet originated");
            self.apply(from, decision, Some(to), &mut wire);
        }
        self.carry(wire);
        self.flush();
        Ok(id)
    }

    /// Place a node somewhere else
    ///
    /// Neighbors learn the new position from its next HELLO.
    pub fn move_node(&mut self, address: Ipv4Addr, position: Position) -> SimResult<()> {
        if !self.topology.set_position(address, position) {
            return Err(SimError::UnknownNode(address));
        }
        let stamp = u32::try_from(self.elapsed().as_secs()).unwrap_or(u32::MAX);
        self.registry.publish(address, position, stamp);
        self.record(SimEvent::Moved {
            at: self.elapsed(),
            node: address,
            position,
        });
        Ok(())
    }

    /// Take a node's interface down; queued packets are discarded
    pub fn fail_node(&mut self, address: Ipv4Addr) -> SimResult<()> {
        self.with_router(address, |router| router.interface_down())
            .ok_or(SimError::UnknownNode(address))?;
        self.record(SimEvent::InterfaceDown {
            at: self.elapsed(),
            node: address,
        });
        self.flush();
        Ok(())
    }

    /// Bring a failed node back
    pub fn restore_node(&mut self, address: Ipv4Addr) -> SimResult<()> {
        self.with_router(address, |router| router.interface_up())
            .ok_or(SimError::UnknownNode(address))?;
        self.record(SimEvent::InterfaceUp {
            at: self.elapsed(),
            node: address,
        });
        self.flush();
        Ok(())
    }

    /// Simulated time since the simulation was created
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn router(&self, address: Ipv4Addr) -> Option<&SpyRouter> {
        self.stations.get(&address).map(|s| &s.router)
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.stations.keys().copied().collect()
    }

    /// Sum of one router counter over all nodes
    pub fn router_total(&self, counter: impl Fn(&RouterStats) -> u64) -> u64 {
        self.stations
            .values()
            .map(|s| counter(&s.router.stats()))
            .sum()
    }

    /// Packets waiting in deferred queues across all nodes
    pub fn queued(&self) -> usize {
        self.stations.values().map(|s| s.router.queue().len()).sum()
    }

    /// Whether `id` has reached its destination
    pub fn is_delivered(&self, id: PacketId) -> bool {
        self.in_flight.get(&id).is_some_and(|p| p.delivered)
    }

    /// Data transmissions recorded for `id` so far
    pub fn hops(&self, id: PacketId) -> Option<u64> {
        self.in_flight.get(&id).map(|p| p.hops)
    }

    /// Data hops `(from, to)` in the order they went on the air
    pub fn data_hops(&self) -> Vec<(Ipv4Addr, Ipv4Addr)> {
        self.event_log
            .iter()
            .filter_map(|event| match event {
                SimEvent::Transmitted {
                    from,
                    to,
                    kind: FrameKind::Data,
                    ..
                } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Get a summary of the current state
    pub fn state_summary(&self) -> String {
        format!(
            "t={:.2}s: {} nodes, {}/{} delivered, {} dropped, {} queued, {} recoveries, {} shortcuts",
            self.elapsed().as_secs_f64(),
            self.stations.len(),
            self.stats.delivered,
            self.stats.originated,
            self.stats.dropped,
            self.queued(),
            self.router_total(|s| s.recovery_entries),
            self.router_total(|s| s.shortcuts_installed),
        )
    }

    /// Run `f` on one router with its node context entered
    fn with_router<R>(&mut self, address: Ipv4Addr, f: impl FnOnce(&mut SpyRouter) -> R) -> Option<R> {
        let station = self.stations.get_mut(&address)?;
        let _context =
            NodeContextGuard::with_instance_id(address, NodeKind::Simulated, station.instance_id);
        let span = debug_span!("sim_node", node = %address);
        let _enter = span.enter();
        Some(f(&mut station.router))
    }

    fn record(&mut self, event: SimEvent) {
        trace!(?event, "sim event");
        self.event_log.push(event);
    }

    fn apply(
        &mut self,
        at: Ipv4Addr,
        decision: RoutingDecision,
        destination: Option<Ipv4Addr>,
        wire: &mut VecDeque<Frame>,
    ) {
        match decision {
            RoutingDecision::Forward { next_hop, packet } => match packet.encode() {
                Ok(frame) => wire.push_back((at, next_hop, frame)),
                Err(e) => warn!(node = %at, error = %e, "could not encode forwarded packet"),
            },
            RoutingDecision::Deliver { packet } => self.record_delivery(at, &packet),
            RoutingDecision::Drop { reason } => self.record_drop(at, destination, reason),
            RoutingDecision::Deferred => {}
        }
    }

    fn record_delivery(&mut self, node: Ipv4Addr, packet: &DataPacket) {
        let at = self.elapsed();
        let id = PacketId::from_payload(&packet.payload);
        self.record(SimEvent::Delivered {
            at,
            packet: id,
            node,
            source: packet.source,
        });

        let Some(flight) = id.and_then(|id| self.in_flight.get_mut(&id)) else {
            return;
        };
        if flight.delivered {
            return;
        }
        flight.delivered = true;
        self.stats.delivered += 1;
        self.stats.total_hops += flight.hops;
        self.stats.total_latency += at.saturating_sub(flight.originated);
        debug!(packet = ?id, node = %node, hops = flight.hops, "packet delivered");
    }

    fn record_drop(&mut self, node: Ipv4Addr, destination: Option<Ipv4Addr>, reason: DropReason) {
        self.stats.dropped += 1;
        *self.stats.drops_by_reason.entry(reason).or_default() += 1;
        debug!(node = %node, dst = ?destination, reason = %reason, "packet dropped");
        self.record(SimEvent::Dropped {
            at: self.elapsed(),
            node,
            destination,
            reason,
        });
    }

    /// Drain every router's effects until the air is quiet
    fn flush(&mut self) {
        loop {
            let mut wire = VecDeque::new();
            for address in self.addresses() {
                let effects = self
                    .with_router(address, |router| router.take_outbound())
                    .unwrap_or_default();
                for effect in effects {
                    match effect {
                        Outbound::Dropped { packet, reason } => {
                            self.record_drop(address, Some(packet.destination), reason);
                        }
                        other => match other.to_datagram() {
                            Ok(Some((dest, frame))) => wire.push_back((address, dest, frame)),
                            Ok(None) => {}
                            Err(e) => warn!(node = %address, error = %e, "could not encode frame"),
                        },
                    }
                }
            }
            if wire.is_empty() {
                return;
            }
            self.carry(wire);
        }
    }

    /// Hand frames to the nodes that can hear them, following any forwards
    fn carry(&mut self, mut wire: VecDeque<Frame>) {
        let mut processed = 0;
        while let Some((from, to, frame)) = wire.pop_front() {
            processed += 1;
            if processed > self.config.max_frames_per_flush {
                warn!(
                    pending = wire.len(),
                    "forwarding did not settle, discarding frames on the air"
                );
                return;
            }

            let Ok(kind) = peek_type(&frame) else {
                continue;
            };
            let at = self.elapsed();
            self.stats.frames_transmitted += 1;
            self.record(SimEvent::Transmitted {
                at,
                from,
                to,
                kind: kind.into(),
            });

            let destination = if kind == MessageType::Position {
                let packet = DataPacket::decode(&frame).ok();
                if let Some(id) = packet.as_ref().and_then(|p| PacketId::from_payload(&p.payload))
                    && let Some(flight) = self.in_flight.get_mut(&id)
                {
                    flight.hops += 1;
                }
                packet.map(|p| p.destination)
            } else {
                self.stats.control_frames += 1;
                None
            };

            let receivers = if to.is_broadcast() {
                self.topology.neighbors(from)
            } else if self.topology.in_range(from, to) {
                vec![to]
            } else {
                trace!(from = %from, to = %to, "unicast out of range");
                Vec::new()
            };

            for receiver in receivers {
                if self.lose_frame() {
                    self.stats.frames_lost += 1;
                    self.record(SimEvent::Lost {
                        at,
                        from,
                        to: receiver,
                    });
                    continue;
                }
                let result = self.with_router(receiver, |router| router.handle_datagram(from, &frame));
                match result {
                    Some(Ok(Some(decision))) => self.apply(receiver, decision, destination, &mut wire),
                    Some(Ok(None)) | None => {}
                    Some(Err(e)) => trace!(node = %receiver, error = %e, "frame not accepted"),
                }
            }
        }
    }

    fn lose_frame(&mut self) -> bool {
        self.config.loss_probability > 0.0
            && self.rng.random_bool(self.config.loss_probability.clamp(0.0, 1.0))
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("nodes", &self.stations.len())
            .field("elapsed", &self.elapsed())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::node_addr;

    fn line(count: usize) -> Simulation {
        Simulation::new(Topology::line(count, 100.0, 150.0), SimConfig::default()).unwrap()
    }

    #[test]
    fn test_direct_delivery() {
        let mut sim = line(2);
        sim.run_for(Duration::from_millis(1500));

        let id = sim.send(node_addr(0), node_addr(1), b"hi").unwrap();
        assert!(sim.is_delivered(id));
        assert_eq!(sim.hops(id), Some(1));
        assert_eq!(sim.stats.delivered, 1);
    }

    #[test]
    fn test_relay_delivery() {
        let mut sim = line(4);
        sim.run_for(Duration::from_millis(1500));

        let id = sim.send(node_addr(0), node_addr(3), b"far").unwrap();
        assert!(sim.is_delivered(id));
        assert_eq!(sim.hops(id), Some(3));
        assert_eq!(
            sim.data_hops(),
            vec![
                (node_addr(0), node_addr(1)),
                (node_addr(1), node_addr(2)),
                (node_addr(2), node_addr(3)),
            ]
        );
        assert!((sim.stats.average_hops() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_send_from_unknown_node() {
        let mut sim = line(2);
        assert!(matches!(
            sim.send(node_addr(7), node_addr(0), b"x"),
            Err(SimError::UnknownNode(_))
        ));
        assert_eq!(sim.stats.originated, 0);
    }

    #[test]
    fn test_send_before_hellos_is_deferred_then_delivered() {
        // first drain only after every node has announced itself
        let mut router = SpyConfig::default();
        router.queue_check_interval = Duration::from_secs(1);
        let config = SimConfig::default().with_router(router);
        let mut sim = Simulation::new(Topology::line(2, 100.0, 150.0), config).unwrap();
        let id = sim.send(node_addr(0), node_addr(1), b"early").unwrap();
        assert!(!sim.is_delivered(id));
        assert_eq!(sim.queued(), 1);

        sim.run_for(Duration::from_secs(2));
        assert!(sim.is_delivered(id));
        assert_eq!(sim.queued(), 0);
    }

    #[test]
    fn test_failed_node_drops_queue() {
        let mut sim = line(2);
        sim.send(node_addr(0), node_addr(1), b"queued").unwrap();
        sim.fail_node(node_addr(0)).unwrap();

        assert_eq!(sim.stats.dropped, 1);
        assert_eq!(sim.stats.drops(DropReason::NoRoute), 1);
        assert!(matches!(
            sim.event_log.last(),
            Some(SimEvent::Dropped { destination: Some(d), .. }) if *d == node_addr(1)
        ));
    }

    #[test]
    fn test_move_node_updates_registry() {
        let mut sim = line(2);
        sim.move_node(node_addr(1), Position::new(50.0, 0.0)).unwrap();
        assert_eq!(sim.topology().position(node_addr(1)), Some(Position::new(50.0, 0.0)));
        assert_eq!(
            sim.router(node_addr(1)).unwrap().position(),
            Position::new(50.0, 0.0)
        );
        assert!(sim.move_node(node_addr(9), Position::default()).is_err());
    }

    #[test]
    fn test_total_loss_prevents_discovery() {
        let config = SimConfig::default().with_loss(1.0);
        let mut sim = Simulation::new(Topology::line(2, 100.0, 150.0), config).unwrap();
        sim.run_for(Duration::from_secs(2));

        assert!(sim.stats.frames_lost > 0);
        assert!(sim.router(node_addr(0)).unwrap().table().is_empty());
    }

    #[test]
    fn test_stats_ratios() {
        let stats = SimStats {
            originated: 4,
            delivered: 2,
            total_hops: 6,
            total_latency: Duration::from_millis(40),
            ..Default::default()
        };
        assert!((stats.delivery_ratio() - 0.5).abs() < f64::EPSILON);
        assert!((stats.average_hops() - 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.average_latency(), Duration::from_millis(20));
        assert_eq!(SimStats::default().average_latency(), Duration::ZERO);
    }
}
