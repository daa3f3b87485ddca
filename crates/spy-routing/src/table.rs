//! Neighbor and suppression table
//!
//! The [`PositionTable`] holds the last announced position of every
//! one-hop neighbor together with two suppression sets:
//!
//! - **not-send**: `(flow, neighbor)` pairs that must not be chosen as next hop
//! - **not-forward**: flows whose packets from a given predecessor should not
//!   be re-forwarded normally; also remembers that predecessor as the flow's
//!   last sender
//!
//! All three expire after the same lifetime. Expiry is lazy: callers run
//! [`purge`](PositionTable::purge) before each routing decision.
//!
//! Neighbors are kept in address order so every scan is deterministic.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::trace;

use spy_core::{FlowKey, Position};

/// A known one-hop neighbor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborEntry {
    pub position: Position,
    pub last_updated: Instant,
}

#[derive(Debug, Clone, Copy)]
struct NotForwardEntry {
    predecessor: Ipv4Addr,
    inserted_at: Instant,
}

/// Neighbor positions plus time-bounded suppression state
#[derive(Debug, Clone)]
pub struct PositionTable {
    neighbors: BTreeMap<Ipv4Addr, NeighborEntry>,
    not_send: HashMap<(FlowKey, Ipv4Addr), Instant>,
    not_forward: HashMap<FlowKey, NotForwardEntry>,
    lifetime: Duration,
}

impl PositionTable {
    /// Create an empty table whose entries live for `lifetime`
    pub fn new(lifetime: Duration) -> Self {
        Self {
            neighbors: BTreeMap::new(),
            not_send: HashMap::new(),
            not_forward: HashMap::new(),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Insert or overwrite a neighbor
    pub fn add_entry(&mut self, addr: Ipv4Addr, position: Position, now: Instant) {
        self.neighbors.insert(
            addr,
            NeighborEntry {
                position,
                last_updated: now,
            },
        );
    }

    pub fn delete_entry(&mut self, addr: Ipv4Addr) {
        self.neighbors.remove(&addr);
    }

    /// Forget all neighbors and suppression state
    pub fn clear(&mut self) {
        self.neighbors.clear();
        self.not_send.clear();
        self.not_forward.clear();
    }

    /// Drop every record whose `inserted + lifetime <= now`
    pub fn purge(&mut self, now: Instant) {
        let lifetime = self.lifetime;
        let alive = |t: Instant| t + lifetime > now;

        let before = self.neighbors.len();
        self.neighbors.retain(|_, entry| alive(entry.last_updated));
        self.not_send.retain(|_, inserted_at| alive(*inserted_at));
        self.not_forward.retain(|_, entry| alive(entry.inserted_at));

        let expired = before - self.neighbors.len();
        if expired > 0 {
            trace!(expired, remaining = self.neighbors.len(), "purged neighbors");
        }
    }

    pub fn position(&self, addr: Ipv4Addr) -> Option<Position> {
        self.neighbors.get(&addr).map(|entry| entry.position)
    }

    pub fn entry(&self, addr: Ipv4Addr) -> Option<&NeighborEntry> {
        self.neighbors.get(&addr)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.neighbors.contains_key(&addr)
    }

    /// All neighbor addresses in ascending order
    pub fn neighbors(&self) -> Vec<Ipv4Addr> {
        self.neighbors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// `addr` is a known neighbor and not suppressed for `key`
    pub fn is_neighbor(&self, key: &FlowKey, addr: Ipv4Addr) -> bool {
        self.neighbors.contains_key(&addr) && !self.has_not_send(key, addr)
    }

    /// Addresses of `candidates` that are also neighbors, in candidate order
    pub fn intersection(&self, candidates: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
        candidates
            .iter()
            .filter(|addr| self.neighbors.contains_key(addr))
            .copied()
            .collect()
    }

    /// Greedy next-hop selection
    ///
    /// A neighbor already suppressed for the inverse flow wins immediately.
    /// Otherwise the unsuppressed neighbor closest to `target` is returned,
    /// but only if it is strictly closer than `self_pos`. `None` means the
    /// packet must enter recovery.
    pub fn best_neighbor(
        &self,
        key: &FlowKey,
        target: Position,
        self_pos: Position,
    ) -> Option<Ipv4Addr> {
        let inverse = key.inverse();
        if let Some(addr) = self
            .neighbors
            .keys()
            .find(|addr| self.has_not_send(&inverse, **addr))
        {
            trace!(flow = %key, next_hop = %addr, "neighbor suppressed on inverse path");
            return Some(*addr);
        }

        let mut best: Option<(Ipv4Addr, f64)> = None;
        for (addr, entry) in &self.neighbors {
            if self.has_not_send(key, *addr) {
                continue;
            }
            let distance = entry.position.distance(&target);
            // first wins on ties
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((*addr, distance));
            }
        }

        let own_distance = self_pos.distance(&target);
        best.filter(|(_, distance)| *distance < own_distance)
            .map(|(addr, _)| addr)
    }

    /// Right-hand-rule next-hop selection
    ///
    /// Picks the unsuppressed neighbor with the smallest strictly positive
    /// counterclockwise angle from the edge `self_pos -> previous_hop`. When
    /// none qualifies the first neighbor in the table is returned so the
    /// packet is never stuck while any neighbor exists.
    pub fn best_angle(
        &self,
        key: &FlowKey,
        previous_hop: Position,
        self_pos: Position,
    ) -> Option<Ipv4Addr> {
        let first = *self.neighbors.keys().next()?;

        let mut best: Option<(Ipv4Addr, f64)> = None;
        for (addr, entry) in &self.neighbors {
            let angle = self_pos.angle_between(&previous_hop, &entry.position);
            if !angle.is_finite() || angle == 0.0 || self.has_not_send(key, *addr) {
                continue;
            }
            if best.is_none_or(|(_, a)| angle < a) {
                best = Some((*addr, angle));
            }
        }

        Some(best.map(|(addr, _)| addr).unwrap_or(first))
    }

    pub fn add_not_send(&mut self, key: FlowKey, addr: Ipv4Addr, now: Instant) {
        self.not_send.insert((key, addr), now);
    }

    pub fn has_not_send(&self, key: &FlowKey, addr: Ipv4Addr) -> bool {
        self.not_send.contains_key(&(*key, addr))
    }

    /// Suppress re-forwarding of `key` and remember `predecessor` as its last sender
    pub fn add_not_forward(&mut self, key: FlowKey, predecessor: Ipv4Addr, now: Instant) {
        self.not_forward.insert(
            key,
            NotForwardEntry {
                predecessor,
                inserted_at: now,
            },
        );
    }

    pub fn has_not_forward(&self, key: &FlowKey) -> bool {
        self.not_forward.contains_key(key)
    }

    /// The predecessor recorded for `key`, if any
    pub fn last_sender(&self, key: &FlowKey) -> Option<Ipv4Addr> {
        self.not_forward.get(key).map(|entry| entry.predecessor)
    }
}
