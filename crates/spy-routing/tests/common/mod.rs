//! In-process radio network for driving several routers under a manual clock

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use spy_core::{
    Clock, DataPacket, LocationRegistry, LocationService, ManualClock, MessageType,
    OracleLocationService, Position, StaticMobility, wire::peek_type,
};
use spy_routing::{DropReason, Outbound, RoutingDecision, SpyConfig, SpyRouter};

/// Frames processed in one flush before we assume a forwarding loop
const MAX_FRAMES_PER_FLUSH: usize = 10_000;

pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

/// A frame observed on the air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
    pub kind: MessageType,
}

struct Station {
    router: SpyRouter,
    position: Position,
}

pub struct TestNet {
    pub clock: ManualClock,
    pub registry: LocationRegistry,
    range: f64,
    stations: BTreeMap<Ipv4Addr, Station>,
    pub delivered: Vec<(Ipv4Addr, DataPacket)>,
    pub dropped: Vec<(Ipv4Addr, DropReason)>,
    pub transmissions: Vec<Transmission>,
}

impl TestNet {
    pub fn new(range: f64) -> Self {
        spy_logging::init_testing();
        Self {
            clock: ManualClock::new(),
            registry: LocationRegistry::new(),
            range,
            stations: BTreeMap::new(),
            delivered: Vec::new(),
            dropped: Vec::new(),
            transmissions: Vec::new(),
        }
    }

    /// Add a node using the oracle location service
    pub fn add_node(&mut self, last: u8, x: f64, y: f64) -> Ipv4Addr {
        let location = Arc::new(OracleLocationService::new(self.registry.clone()));
        self.add_node_with(last, x, y, SpyConfig::default(), location)
    }

    pub fn add_node_with(
        &mut self,
        last: u8,
        x: f64,
        y: f64,
        config: SpyConfig,
        location: Arc<dyn LocationService>,
    ) -> Ipv4Addr {
        let address = addr(last);
        let position = Position::new(x, y);
        self.registry.publish(address, position, 0);

        let router = SpyRouter::new(
            address,
            config,
            Arc::new(self.clock.clone()),
            location,
            Arc::new(StaticMobility::new(position)),
        )
        .expect("valid router config")
        .with_rng_seed(u64::from(last));

        self.stations.insert(address, Station { router, position });
        address
    }

    pub fn router(&self, address: Ipv4Addr) -> &SpyRouter {
        &self.stations[&address].router
    }

    pub fn router_mut(&mut self, address: Ipv4Addr) -> &mut SpyRouter {
        &mut self.stations.get_mut(&address).expect("known station").router
    }

    pub fn start(&mut self) {
        for station in self.stations.values_mut() {
            station.router.start();
        }
    }

    fn in_range(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        match (self.stations.get(&a), self.stations.get(&b)) {
            (Some(sa), Some(sb)) => sa.position.distance(&sb.position) <= self.range,
            _ => false,
        }
    }

    /// Advance time in small steps, firing timers and delivering frames
    pub fn run_for(&mut self, duration: Duration) {
        let step = Duration::from_millis(10);
        let end = self.clock.now() + duration;
        while self.clock.now() < end {
            self.clock.advance(step);
            let addresses: Vec<_> = self.stations.keys().copied().collect();
            for address in addresses {
                self.router_mut(address).poll_timers();
            }
            self.flush();
        }
    }

    /// Originate a packet at `from` and carry it as far as it goes right now
    pub fn send(&mut self, from: Ipv4Addr, to: Ipv4Addr, payload: &'static [u8]) -> RoutingDecision {
        let packet = DataPacket::new(from, to, payload);
        let decision = self.router_mut(from).route_output(packet);
        let mut wire = VecDeque::new();
        self.apply(from, decision.clone(), &mut wire);
        self.deliver_frames(wire);
        self.flush();
        decision
    }

    fn apply(&mut self, at: Ipv4Addr, decision: RoutingDecision, wire: &mut VecDeque<(Ipv4Addr, Ipv4Addr, Bytes)>) {
        match decision {
            RoutingDecision::Forward { next_hop, packet } => {
                let frame = packet.encode().expect("encodable packet");
                wire.push_back((at, next_hop, frame));
            }
            RoutingDecision::Deliver { packet } => self.delivered.push((at, packet)),
            RoutingDecision::Drop { reason } => self.dropped.push((at, reason)),
            RoutingDecision::Deferred => {}
        }
    }

    /// Drain every router's effects until the air is quiet
    pub fn flush(&mut self) {
        loop {
            let mut wire = VecDeque::new();
            let addresses: Vec<_> = self.stations.keys().copied().collect();
            for address in addresses {
                for effect in self.router_mut(address).take_outbound() {
                    match effect {
                        Outbound::Dropped { reason, .. } => self.dropped.push((address, reason)),
                        other => {
                            if let Some((dest, frame)) = other.to_datagram().expect("encodable frame") {
                                wire.push_back((address, dest, frame));
                            }
                        }
                    }
                }
            }
            if wire.is_empty() {
                return;
            }
            self.deliver_frames(wire);
        }
    }

    fn deliver_frames(&mut self, mut wire: VecDeque<(Ipv4Addr, Ipv4Addr, Bytes)>) {
        let mut processed = 0;
        while let Some((from, to, frame)) = wire.pop_front() {
            processed += 1;
            assert!(processed < MAX_FRAMES_PER_FLUSH, "forwarding did not settle");

            let kind = peek_type(&frame).expect("typed frame");
            self.transmissions.push(Transmission { from, to, kind });

            let receivers: Vec<Ipv4Addr> = if to.is_broadcast() {
                self.stations
                    .keys()
                    .copied()
                    .filter(|other| *other != from && self.in_range(from, *other))
                    .collect()
            } else if self.in_range(from, to) {
                vec![to]
            } else {
                Vec::new()
            };

            for receiver in receivers {
                let result = self.router_mut(receiver).handle_datagram(from, &frame);
                if let Ok(Some(decision)) = result {
                    self.apply(receiver, decision, &mut wire);
                }
            }
        }
    }

    /// Data frames observed since the last call to [`clear_log`](Self::clear_log)
    pub fn data_hops(&self) -> Vec<(Ipv4Addr, Ipv4Addr)> {
        self.transmissions
            .iter()
            .filter(|t| t.kind == MessageType::Position)
            .map(|t| (t.from, t.to))
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.transmissions.clear();
        self.delivered.clear();
        self.dropped.clear();
    }

    pub fn delivered_to(&self, address: Ipv4Addr) -> Vec<&DataPacket> {
        self.delivered
            .iter()
            .filter(|(at, _)| *at == address)
            .map(|(_, packet)| packet)
            .collect()
    }
}
