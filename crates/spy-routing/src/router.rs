//! The SPY routing engine
//!
//! [`SpyRouter`] is a synchronous reactor. It never touches a socket or a
//! timer wheel itself: callers feed it packets, datagrams and timer polls,
//! and it answers with a [`RoutingDecision`] for the packet in hand plus a
//! queue of [`Outbound`] effects (control frames, forwards of deferred
//! packets, drops) collected with [`SpyRouter::take_outbound`].
//!
//! ## Forwarding
//!
//! 1. **GREEDY**: hand the packet to the neighbor strictly closer to the
//!    destination's estimated position
//! 2. **RECOVERY**: when no neighbor improves, walk the face with the
//!    right-hand rule until some node is closer than where recovery began
//! 3. **DEFER**: packets originated here whose destination is unresolved or
//!    unreachable wait in the deferred queue for the next drain
//! 4. **DROP**: recovery dead ends, unknown destinations, full or expired queue
//!
//! Shortcut discovery lives in [`crate::shortcut`].

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use spy_core::{
    Clock, ControlMessage, DataPacket, DisjointHeader, DropReason, FlowKey, HelloHeader,
    LocationService, MessageType, Mobility, Position, PositionHeader, RoutingDecision, WireError,
    peek_type,
};

use crate::config::{LocationServiceKind, SpyConfig};
use crate::error::{RoutingError, RoutingResult};
use crate::parity::ParityTracker;
use crate::queue::RequestQueue;
use crate::table::PositionTable;
use crate::timer::{TimerKind, Timers};

/// Side effects produced by the router outside the current call's decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send a control frame to a neighbor, or to the broadcast address
    Control {
        dest: Ipv4Addr,
        message: ControlMessage,
    },
    /// A deferred packet found a next hop
    Forward {
        next_hop: Ipv4Addr,
        packet: DataPacket,
    },
    /// A deferred packet was given up on
    Dropped {
        packet: DataPacket,
        reason: DropReason,
    },
}

impl Outbound {
    /// Link-layer destination and encoded frame, for effects that go on the wire
    pub fn to_datagram(&self) -> Result<Option<(Ipv4Addr, Bytes)>, WireError> {
        match self {
            Self::Control { dest, message } => Ok(Some((*dest, message.encode()?))),
            Self::Forward { next_hop, packet } => Ok(Some((*next_hop, packet.encode()?))),
            Self::Dropped { .. } => Ok(None),
        }
    }
}

/// Counters kept by a router
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub hellos_sent: u64,
    pub hellos_received: u64,
    pub packets_originated: u64,
    pub packets_forwarded: u64,
    pub packets_delivered: u64,
    pub packets_deferred: u64,
    pub packets_dropped: u64,
    pub recovery_entries: u64,
    pub control_sent: u64,
    pub control_received: u64,
    pub shortcuts_installed: u64,
    pub malformed_frames: u64,
}

/// Position-based router for a single node
pub struct SpyRouter {
    address: Ipv4Addr,
    config: SpyConfig,
    clock: Arc<dyn Clock>,
    location: Arc<dyn LocationService>,
    mobility: Arc<dyn Mobility>,
    pub(crate) table: PositionTable,
    queue: RequestQueue,
    pub(crate) parity: ParityTracker,
    pub(crate) timers: Timers<TimerKind>,
    /// Path bit handed to the next originated packet
    next_path_bit: u8,
    pub(crate) rng: StdRng,
    outbound: VecDeque<Outbound>,
    pub(crate) stats: RouterStats,
    interface_up: bool,
}

impl SpyRouter {
    /// Create a router for the node at `address`
    ///
    /// Fails when the configuration names a location service without an
    /// implementation or does not validate.
    pub fn new(
        address: Ipv4Addr,
        config: SpyConfig,
        clock: Arc<dyn Clock>,
        location: Arc<dyn LocationService>,
        mobility: Arc<dyn Mobility>,
    ) -> RoutingResult<Self> {
        if config.location_service != LocationServiceKind::Oracle {
            return Err(RoutingError::UnsupportedLocationService(
                config.location_service,
            ));
        }
        if let Some(warning) = config.validate().into_iter().next() {
            return Err(RoutingError::InvalidConfig(warning));
        }

        Ok(Self {
            address,
            table: PositionTable::new(config.entry_lifetime),
            queue: RequestQueue::new(config.max_queue_len, config.max_queue_time),
            parity: ParityTracker::new(config.parity_lifetime),
            timers: Timers::new(),
            next_path_bit: 0,
            rng: StdRng::from_rng(&mut rand::rng()),
            outbound: VecDeque::new(),
            stats: RouterStats::default(),
            interface_up: true,
            config,
            clock,
            location,
            mobility,
        })
    }

    /// Use a fixed seed for jitter and path-bit picks
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn config(&self) -> &SpyConfig {
        &self.config
    }

    pub fn table(&self) -> &PositionTable {
        &self.table
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn parity(&self) -> &ParityTracker {
        &self.parity
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn is_interface_up(&self) -> bool {
        self.interface_up
    }

    /// This node's current position
    pub fn position(&self) -> Position {
        self.mobility.position()
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Arm the HELLO timer
    ///
    /// The first announcement goes out at a random point within half an
    /// interval so neighbors started together do not collide.
    pub fn start(&mut self) {
        let now = self.now();
        let half = self.config.hello_interval.as_secs_f64() / 2.0;
        let delay = Duration::from_secs_f64(self.rng.random_range(0.0..=half));
        self.timers.schedule(TimerKind::Hello, now, delay);
        info!(node = %self.address, first_hello = ?delay, "router started");
    }

    /// Take the interface down, forgetting neighbors, location estimates and
    /// deferred packets
    pub fn interface_down(&mut self) {
        if !self.interface_up {
            return;
        }
        self.interface_up = false;
        self.table.clear();
        self.location.clear();
        self.timers.cancel_all();
        for entry in self.queue.clear() {
            self.push_drop(entry.packet, DropReason::NoRoute);
        }
        info!(node = %self.address, "interface down");
    }

    /// Bring the interface back up and restart announcements
    pub fn interface_up(&mut self) {
        if self.interface_up {
            return;
        }
        self.interface_up = true;
        info!(node = %self.address, "interface up");
        self.start();
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Run every timer that is due
    pub fn poll_timers(&mut self) -> Vec<TimerKind> {
        let now = self.now();
        let due = self.timers.take_due(now);
        for kind in &due {
            trace!(node = %self.address, timer = ?kind, "timer fired");
            match kind {
                TimerKind::Hello => {
                    self.send_hello();
                    let interval = self.config.hello_interval.as_secs_f64();
                    let jitter = self.rng.random_range(-interval / 2.0..=interval / 2.0);
                    let delay = Duration::from_secs_f64(interval + jitter);
                    self.timers.schedule(TimerKind::Hello, now, delay);
                }
                TimerKind::CheckQueue => self.check_queue(),
                TimerKind::CheckParity => self.check_parity_paths(),
            }
        }
        due
    }

    /// Drain the effects produced since the last call
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        self.outbound.drain(..).collect()
    }

    pub(crate) fn send_control(&mut self, dest: Ipv4Addr, message: ControlMessage) {
        trace!(node = %self.address, dest = %dest, kind = %message.message_type(), "control frame queued");
        self.stats.control_sent += 1;
        self.outbound.push_back(Outbound::Control { dest, message });
    }

    fn push_drop(&mut self, packet: DataPacket, reason: DropReason) {
        debug!(node = %self.address, dst = %packet.destination, reason = %reason, "packet dropped");
        self.stats.packets_dropped += 1;
        self.outbound.push_back(Outbound::Dropped { packet, reason });
    }

    fn drop_decision(&mut self, packet: &DataPacket, reason: DropReason) -> RoutingDecision {
        debug!(node = %self.address, dst = %packet.destination, reason = %reason, "packet dropped");
        self.stats.packets_dropped += 1;
        RoutingDecision::drop(reason)
    }

    fn forward_decision(&mut self, next_hop: Ipv4Addr, packet: DataPacket) -> RoutingDecision {
        debug!(node = %self.address, dst = %packet.destination, next_hop = %next_hop, flow = %packet.flow_key(), "forwarding");
        self.stats.packets_forwarded += 1;
        RoutingDecision::forward(next_hop, packet)
    }

    /// Broadcast our position to every neighbor in range
    pub fn send_hello(&mut self) {
        if !self.interface_up {
            return;
        }
        let hello = HelloHeader::new(self.mobility.position());
        self.stats.hellos_sent += 1;
        self.send_control(self.config.broadcast, ControlMessage::Hello(hello));
    }

    /// Alternate between the two disjoint paths
    fn allocate_path_bit(&mut self) -> u8 {
        let bit = self.next_path_bit;
        self.next_path_bit ^= 1;
        bit
    }

    /// Route a packet originated at this node
    ///
    /// The packet is stamped with a fresh disjoint header. Packets whose
    /// destination is still being located, or that have no greedy next hop
    /// yet, are deferred to the queue.
    pub fn route_output(&mut self, mut packet: DataPacket) -> RoutingDecision {
        if !self.interface_up {
            debug!(node = %self.address, "no SPY interfaces");
            return self.drop_decision(&packet, DropReason::NoRoute);
        }

        let now = self.now();
        self.table.purge(now);
        self.stats.packets_originated += 1;

        if packet.source.is_unspecified() {
            packet.source = self.address;
        }
        let destination = packet.destination;
        let path_bit = self.allocate_path_bit();
        packet.disjoint = DisjointHeader::new(path_bit, 1, self.address, self.address);

        if destination == self.address {
            self.stats.packets_delivered += 1;
            return RoutingDecision::deliver(packet);
        }

        let located = self.location.position(destination);
        if located.is_none() && self.location.is_in_search(destination) {
            return self.defer(packet, now);
        }

        let my_pos = self.mobility.position();
        let key = packet.flow_key();
        let next_hop = if self.table.is_neighbor(&key, destination) {
            Some(destination)
        } else {
            located.and_then(|dst_pos| self.table.best_neighbor(&key, dst_pos, my_pos))
        };

        match (next_hop, located) {
            (Some(next_hop), _) => {
                let updated = self.location.entry_update_time(destination);
                packet.position = PositionHeader::new(
                    located.unwrap_or_default(),
                    updated,
                    Position::default(),
                    false,
                    my_pos,
                );
                self.forward_decision(next_hop, packet)
            }
            // the queue drain retries and falls back to recovery
            (None, Some(_)) => self.defer(packet, now),
            (None, None) => self.drop_decision(&packet, DropReason::NoRoute),
        }
    }

    fn defer(&mut self, packet: DataPacket, now: Instant) -> RoutingDecision {
        if !self.timers.is_running(TimerKind::CheckQueue) {
            self.timers
                .schedule(TimerKind::CheckQueue, now, self.config.queue_check_interval);
        }

        let destination = packet.destination;
        if self.queue.enqueue(packet, now) {
            debug!(node = %self.address, dst = %destination, "packet deferred");
            self.stats.packets_deferred += 1;
            RoutingDecision::Deferred
        } else {
            self.stats.packets_dropped += 1;
            RoutingDecision::drop(DropReason::QueueFull)
        }
    }

    /// Handle a data packet received from a neighbor
    pub fn route_input(&mut self, packet: DataPacket) -> RoutingResult<RoutingDecision> {
        if !self.interface_up {
            return Err(RoutingError::NoInterfaces);
        }

        let now = self.now();
        self.table.purge(now);

        if packet.destination == self.address {
            return Ok(self.deliver(packet, now));
        }

        let mut packet = packet;
        if packet.ttl <= 1 {
            return Ok(self.drop_decision(&packet, DropReason::TtlExpired));
        }
        packet.ttl -= 1;
        Ok(self.forwarding(packet, now))
    }

    fn deliver(&mut self, packet: DataPacket, now: Instant) -> RoutingDecision {
        let key = packet.flow_key();
        self.table
            .add_not_forward(key.inverse(), packet.disjoint.last_hop, now);
        self.parity.record(
            packet.source,
            packet.disjoint.path_id,
            packet.disjoint.parity,
            now,
        );
        if !self.timers.is_running(TimerKind::CheckParity) {
            self.timers
                .schedule(TimerKind::CheckParity, now, self.config.parity_initial_delay);
        }

        debug!(node = %self.address, src = %packet.source, flow = %key, parity = packet.disjoint.parity, "local delivery");
        self.stats.packets_delivered += 1;
        RoutingDecision::deliver(packet)
    }

    /// Per-hop forwarding decision for a packet in transit
    fn forwarding(&mut self, mut packet: DataPacket, now: Instant) -> RoutingDecision {
        let key = packet.flow_key();
        let disjoint = packet.disjoint;

        // the previous hop did not change the path state and we already
        // carry this flow: bounce it back along the designated return path
        if disjoint.last_hop == disjoint.last_forwarder && self.table.has_not_forward(&key) {
            packet.disjoint.last_forwarder = self.address;
            packet.disjoint.toggle_parity();
            trace!(node = %self.address, flow = %key, "returning packet to last hop");
            return self.forward_decision(disjoint.last_hop, packet);
        }

        if disjoint.last_hop != disjoint.last_forwarder {
            self.table.add_not_send(key, disjoint.last_forwarder, now);
        } else if self.address != packet.source {
            self.table.add_not_forward(key.inverse(), disjoint.last_hop, now);
        }

        packet.disjoint.last_hop = self.address;
        packet.disjoint.last_forwarder = self.address;
        packet.disjoint.toggle_parity();

        let my_pos = self.mobility.position();
        let header = packet.position;
        let mut dst_pos = header.destination();

        if header.in_recovery() {
            let improved =
                my_pos.distance(&dst_pos) < header.recovery_position().distance(&dst_pos);
            if !improved {
                return self.recover_or_drop(packet, &key);
            }
            trace!(node = %self.address, flow = %key, "leaving recovery");
        }

        let mut updated = header.updated;
        let local_updated = self.location.entry_update_time(packet.destination);
        if local_updated > updated {
            if let Some(pos) = self.location.position(packet.destination) {
                dst_pos = pos;
                updated = local_updated;
            }
        }

        match self.table.best_neighbor(&key, dst_pos, my_pos) {
            Some(next_hop) => {
                packet.position =
                    PositionHeader::new(dst_pos, updated, Position::default(), false, my_pos);
                self.forward_decision(next_hop, packet)
            }
            None => {
                // the destination is the first reference edge
                packet.position = PositionHeader::new(dst_pos, updated, my_pos, true, dst_pos);
                self.stats.recovery_entries += 1;
                debug!(node = %self.address, flow = %key, "entering recovery");
                self.recover_or_drop(packet, &key)
            }
        }
    }

    fn recover_or_drop(&mut self, mut packet: DataPacket, key: &FlowKey) -> RoutingDecision {
        match self.recovery_mode(&mut packet, key) {
            Some(next_hop) => self.forward_decision(next_hop, packet),
            None => self.drop_decision(&packet, DropReason::RecoveryDeadEnd),
        }
    }

    /// Right-hand-rule step for a packet already marked in recovery
    ///
    /// Rewrites the carried last-hop position to ours and returns the
    /// chosen neighbor, or `None` when we have no neighbors at all.
    fn recovery_mode(&mut self, packet: &mut DataPacket, key: &FlowKey) -> Option<Ipv4Addr> {
        let my_pos = self.mobility.position();
        let header = packet.position;
        let previous = header.last_position();

        packet.position = PositionHeader::new(
            header.destination(),
            header.updated,
            header.recovery_position(),
            true,
            my_pos,
        );

        let next_hop = self.table.best_angle(key, previous, my_pos);
        trace!(node = %self.address, flow = %key, next_hop = ?next_hop, "recovery step");
        next_hop
    }

    /// Periodic drain of the deferred queue
    pub fn check_queue(&mut self) {
        let now = self.now();
        self.timers.cancel(TimerKind::CheckQueue);

        for entry in self.queue.purge(now) {
            self.push_drop(entry.packet, DropReason::QueueExpired);
        }

        let mut resolved = Vec::new();
        for destination in self.queue.pending_destinations() {
            if self.send_from_queue(destination, now) {
                resolved.push(destination);
            }
        }
        for destination in resolved {
            self.queue.remove_pending(destination);
        }

        if self.queue.has_pending() {
            self.timers
                .schedule(TimerKind::CheckQueue, now, self.config.queue_check_interval);
        }
    }

    /// Try to send every queued packet for `destination`
    ///
    /// Returns `true` when the destination no longer needs draining.
    fn send_from_queue(&mut self, destination: Ipv4Addr, now: Instant) -> bool {
        if self.location.is_in_search(destination) {
            return false;
        }

        let dst_pos = match self.location.position(destination) {
            Some(pos) if self.location.has_position(destination) => pos,
            _ => {
                debug!(node = %self.address, dst = %destination, "location service gave up");
                for entry in self.queue.drop_with_destination(destination) {
                    self.push_drop(entry.packet, DropReason::LocationUnknown);
                }
                return true;
            }
        };

        self.table.purge(now);
        let my_pos = self.mobility.position();
        let updated = self.location.entry_update_time(destination);

        while let Some(entry) = self.queue.dequeue(destination, now) {
            let mut packet = entry.packet;
            let key = FlowKey::new(self.address, destination, packet.disjoint.path_id);

            let next_hop = if self.table.is_neighbor(&key, destination) {
                Some(destination)
            } else {
                self.table.best_neighbor(&key, dst_pos, my_pos)
            };

            match next_hop {
                Some(next_hop) => {
                    packet.position =
                        PositionHeader::new(dst_pos, updated, Position::default(), false, my_pos);
                    self.stats.packets_forwarded += 1;
                    debug!(node = %self.address, dst = %destination, next_hop = %next_hop, "deferred packet sent");
                    self.outbound.push_back(Outbound::Forward { next_hop, packet });
                }
                None => {
                    packet.position = PositionHeader::new(dst_pos, updated, my_pos, true, dst_pos);
                    self.stats.recovery_entries += 1;
                    debug!(node = %self.address, dst = %destination, "deferred packet enters recovery");
                    match self.recovery_mode(&mut packet, &key) {
                        Some(next_hop) => {
                            self.stats.packets_forwarded += 1;
                            self.outbound.push_back(Outbound::Forward { next_hop, packet });
                        }
                        None => self.push_drop(packet, DropReason::RecoveryDeadEnd),
                    }
                }
            }
        }
        true
    }

    /// Handle a datagram received on the control port
    ///
    /// Data frames produce a decision; control frames are consumed and yield
    /// `None`. Frames that fail to decode are reported and dropped.
    pub fn handle_datagram(
        &mut self,
        from: Ipv4Addr,
        frame: &Bytes,
    ) -> RoutingResult<Option<RoutingDecision>> {
        if !self.interface_up {
            return Err(RoutingError::NoInterfaces);
        }
        // our own broadcasts looped back by the link
        if from == self.address {
            return Ok(None);
        }

        let kind = peek_type(frame).inspect_err(|err| self.note_malformed(from, err))?;
        if kind == MessageType::Position {
            let packet = DataPacket::decode(frame).inspect_err(|err| self.note_malformed(from, err))?;
            return self.route_input(packet).map(Some);
        }

        let message = ControlMessage::decode(frame).inspect_err(|err| self.note_malformed(from, err))?;
        self.stats.control_received += 1;
        if kind == MessageType::Hello {
            self.stats.hellos_received += 1;
        }
        self.handle_control(from, message);
        Ok(None)
    }

    fn note_malformed(&mut self, from: Ipv4Addr, err: &WireError) {
        warn!(node = %self.address, from = %from, error = %err, "dropping malformed frame");
        self.stats.malformed_frames += 1;
    }
}

impl std::fmt::Debug for SpyRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpyRouter")
            .field("address", &self.address)
            .field("neighbors", &self.table.len())
            .field("queued", &self.queue.len())
            .field("interface_up", &self.interface_up)
            .finish_non_exhaustive()
    }
}
