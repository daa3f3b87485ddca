//! Per-source parity observations for the two disjoint paths

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Last parity seen on each path from one source
///
/// A slot holds 0 when unset, otherwise the observed parity bit plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParityState {
    pub path0: u8,
    pub path1: u8,
    pub last_updated: Instant,
}

impl ParityState {
    /// Both paths observed with different parities
    pub fn is_diverged(&self) -> bool {
        self.path0 != 0 && self.path1 != 0 && self.path0 != self.path1
    }
}

/// Parity observations keyed by source address
#[derive(Debug, Clone)]
pub struct ParityTracker {
    states: BTreeMap<Ipv4Addr, ParityState>,
    lifetime: Duration,
}

impl ParityTracker {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            states: BTreeMap::new(),
            lifetime,
        }
    }

    /// Record the parity a delivered packet arrived with
    pub fn record(&mut self, source: Ipv4Addr, path_bit: u8, parity: u8, now: Instant) {
        let state = self.states.entry(source).or_insert(ParityState {
            path0: 0,
            path1: 0,
            last_updated: now,
        });
        let slot = u8::from(parity != 0) + 1;
        if path_bit == 0 {
            state.path0 = slot;
        } else {
            state.path1 = slot;
        }
        state.last_updated = now;
    }

    /// Drop sources not heard from within the lifetime
    pub fn expire(&mut self, now: Instant) -> usize {
        let lifetime = self.lifetime;
        let before = self.states.len();
        self.states
            .retain(|_, state| state.last_updated + lifetime > now);
        before - self.states.len()
    }

    /// Sources whose two paths currently disagree, in address order
    pub fn diverged(&self) -> Vec<Ipv4Addr> {
        self.states
            .iter()
            .filter(|(_, state)| state.is_diverged())
            .map(|(source, _)| *source)
            .collect()
    }

    pub fn get(&self, source: Ipv4Addr) -> Option<&ParityState> {
        self.states.get(&source)
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
