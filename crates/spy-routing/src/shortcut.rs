//! Shortcut discovery
//!
//! A destination that sees the two disjoint paths from one source arrive
//! with different parities suspects they took different routes. It probes
//! backwards along one of them with the list of its own neighbors
//! (NEIGH_INTERSECTION). A node on the path that shares some of those
//! neighbors asks each shared neighbor in turn (IN_ANALYSIS) whether it can
//! reach the prober directly on the other path. The first one that can
//! claims the shortcut and tells the asking node so (SET_PATH). When nobody
//! can, the probe moves one hop further back (TAKE_SHORTCUT), carrying the
//! previous prober as a shortcut candidate.
//!
//! Every handler degrades to doing nothing when the flow state it needs has
//! already expired.

use std::net::Ipv4Addr;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, info, trace};

use spy_core::wire::MAX_NEIGHBORS;
use spy_core::{
    ControlMessage, FlowKey, IntersectionProbe, NeighIntersection, PathId, TakeShortcut,
};

use crate::router::SpyRouter;
use crate::timer::TimerKind;

impl SpyRouter {
    /// Dispatch a decoded control frame received from `from`
    pub(crate) fn handle_control(&mut self, from: Ipv4Addr, message: ControlMessage) {
        let now = self.now();
        self.table.purge(now);

        match message {
            ControlMessage::Hello(hello) => {
                trace!(node = %self.address(), neighbor = %from, position = %hello.position(), "hello");
                self.table.add_entry(from, hello.position(), now);
            }
            ControlMessage::TakeShortcut { origin, probe } => {
                self.on_take_shortcut(origin, probe, now)
            }
            ControlMessage::NeighIntersection(probe) => self.on_neigh_intersection(probe),
            ControlMessage::InAnalysis(probe) => self.on_in_analysis(probe, now),
            ControlMessage::SetPath { path, shortcut } => self.on_set_path(path, shortcut, now),
        }
    }

    /// Our neighbor addresses, capped at what one frame can carry
    fn advertised_neighbors(&self) -> Vec<Ipv4Addr> {
        let mut neighbors = self.table.neighbors();
        neighbors.truncate(MAX_NEIGHBORS);
        neighbors
    }

    fn on_take_shortcut(&mut self, origin: TakeShortcut, probe: IntersectionProbe, now: Instant) {
        let key = FlowKey::from(&probe.path);
        if self.table.is_neighbor(&key.inverse(), origin.shortcut) {
            info!(node = %self.address(), flow = %key, shortcut = %origin.shortcut, "shortcut candidate reachable");
            self.table.add_not_send(key, origin.shortcut, now);
            self.stats.shortcuts_installed += 1;
            return;
        }
        self.on_neigh_intersection(probe);
    }

    fn on_neigh_intersection(&mut self, probe: IntersectionProbe) {
        let shared = self.table.intersection(&probe.intersection.neighbors);
        if shared.is_empty() {
            trace!(node = %self.address(), flow = %FlowKey::from(&probe.path), "no shared neighbors");
            self.extend_probe(probe.path, probe.prober);
            return;
        }

        let mut intersection = NeighIntersection {
            source: probe.intersection.source,
            destination: probe.intersection.destination,
            neighbors: shared,
        };
        let Some(candidate) = intersection.pop_next() else {
            return;
        };

        debug!(node = %self.address(), candidate = %candidate, remaining = intersection.len(), "asking shared neighbor");
        let analysis = IntersectionProbe {
            path: probe.path,
            intersection,
            prober: probe.prober,
        };
        self.send_control(candidate, ControlMessage::InAnalysis(analysis));
    }

    /// Move the search one hop back along the flow
    fn extend_probe(&mut self, path: PathId, prober: TakeShortcut) {
        let key = FlowKey::from(&path);
        let Some(last_sender) = self.table.last_sender(&key) else {
            debug!(node = %self.address(), flow = %key, "no last sender, probe ends here");
            return;
        };

        let me = self.address();
        let intersection = NeighIntersection::new(last_sender, me, self.advertised_neighbors());
        let message = ControlMessage::TakeShortcut {
            origin: prober,
            probe: IntersectionProbe::new(path, intersection, me),
        };
        debug!(node = %me, flow = %key, last_sender = %last_sender, "extending probe");
        self.send_control(last_sender, message);
    }

    fn on_in_analysis(&mut self, mut probe: IntersectionProbe, now: Instant) {
        let me = self.address();
        let key = FlowKey::from(&probe.path);

        if probe.intersection.source == Some(me) {
            // our candidate could not take it; try the next one
            match probe.intersection.pop_next() {
                Some(candidate) => {
                    debug!(node = %me, candidate = %candidate, "asking next shared neighbor");
                    self.send_control(candidate, ControlMessage::InAnalysis(probe));
                }
                None => self.extend_probe(probe.path, probe.prober),
            }
            return;
        }

        let Some(asker) = probe.intersection.source else {
            debug!(node = %me, flow = %key, "analysis without an asking node");
            return;
        };

        let inverse = key.inverse();
        let claimable = probe.intersection.destination.filter(|target| {
            !self.table.has_not_forward(&inverse) && self.table.is_neighbor(&inverse, *target)
        });

        match claimable {
            Some(target) => {
                self.table.add_not_forward(key, asker, now);
                self.table.add_not_send(key, target, now);
                self.stats.shortcuts_installed += 1;
                info!(node = %me, flow = %key, asker = %asker, target = %target, "claiming shortcut");
                self.send_control(
                    asker,
                    ControlMessage::SetPath {
                        path: probe.path,
                        shortcut: TakeShortcut::new(me),
                    },
                );
            }
            None => {
                trace!(node = %me, flow = %key, "cannot claim shortcut, returning analysis");
                self.send_control(asker, ControlMessage::InAnalysis(probe));
            }
        }
    }

    fn on_set_path(&mut self, path: PathId, shortcut: TakeShortcut, now: Instant) {
        let key = FlowKey::from(&path);
        info!(node = %self.address(), flow = %key, shortcut = %shortcut.shortcut, "shortcut installed");
        self.table.add_not_send(key, shortcut.shortcut, now);
        self.stats.shortcuts_installed += 1;
    }

    /// Look for sources whose two disjoint paths disagree and probe one of them
    pub fn check_parity_paths(&mut self) {
        let now = self.now();
        self.timers.cancel(TimerKind::CheckParity);
        self.table.purge(now);

        let expired = self.parity.expire(now);
        if expired > 0 {
            trace!(node = %self.address(), expired, "parity state expired");
        }

        let me = self.address();
        for source in self.parity.diverged() {
            let first: u8 = self.rng.random_range(0..2);
            let found = [first, first ^ 1].into_iter().find_map(|bit| {
                self.table
                    .last_sender(&FlowKey::new(source, me, bit))
                    .map(|last_sender| (bit, last_sender))
            });
            let Some((bit, last_sender)) = found else {
                trace!(node = %me, src = %source, "diverged paths without a last sender");
                continue;
            };

            let intersection = NeighIntersection::new(last_sender, me, self.advertised_neighbors());
            let probe = IntersectionProbe::new(PathId::new(source, me, bit), intersection, me);
            info!(node = %me, src = %source, path = bit, last_sender = %last_sender, "paths diverged, probing");
            self.send_control(last_sender, ControlMessage::NeighIntersection(probe));
        }

        if !self.parity.is_empty() {
            let interval = self.config().parity_check_interval;
            self.timers.schedule(TimerKind::CheckParity, now, interval);
        }
    }
}
