//! Node placement for simulations
//!
//! Provides functions to lay out nodes on the plane:
//! - Line: evenly spaced along the x axis
//! - Grid: rows and columns
//! - Random: uniform over a rectangle, from a seed
//! - Custom: explicit positions
//!
//! Two nodes can hear each other when they are at most `range` apart.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write;
use std::net::Ipv4Addr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use spy_core::Position;

use crate::types::node_addr;

/// Where every node is and how far the radio reaches
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    nodes: BTreeMap<Ipv4Addr, Position>,
    range: f64,
}

impl Topology {
    /// An empty field with the given radio range
    pub fn new(range: f64) -> Self {
        Self {
            nodes: BTreeMap::new(),
            range,
        }
    }

    /// Build from explicit positions; node `i` gets [`node_addr(i)`](node_addr)
    pub fn from_positions(range: f64, positions: &[(f64, f64)]) -> Self {
        let mut topology = Self::new(range);
        for (x, y) in positions {
            topology.push(Position::new(*x, *y));
        }
        topology
    }

    /// `count` nodes `spacing` apart along the x axis
    pub fn line(count: usize, spacing: f64, range: f64) -> Self {
        let mut topology = Self::new(range);
        for i in 0..count {
            topology.push(Position::new(i as f64 * spacing, 0.0));
        }
        topology
    }

    /// `columns` x `rows` nodes, row by row
    pub fn grid(columns: usize, rows: usize, spacing: f64, range: f64) -> Self {
        let mut topology = Self::new(range);
        for row in 0..rows {
            for column in 0..columns {
                topology.push(Position::new(column as f64 * spacing, row as f64 * spacing));
            }
        }
        topology
    }

    /// `count` nodes placed uniformly over `width` x `height`
    pub fn random(count: usize, width: f64, height: f64, range: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut topology = Self::new(range);
        for _ in 0..count {
            let x = rng.random_range(0.0..=width);
            let y = rng.random_range(0.0..=height);
            topology.push(Position::new(x, y));
        }
        topology
    }

    /// Add a node at the next free address
    pub fn push(&mut self, position: Position) -> Ipv4Addr {
        let addr = node_addr(self.nodes.len());
        self.nodes.insert(addr, position);
        addr
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn position(&self, addr: Ipv4Addr) -> Option<Position> {
        self.nodes.get(&addr).copied()
    }

    pub(crate) fn set_position(&mut self, addr: Ipv4Addr, position: Position) -> bool {
        match self.nodes.get_mut(&addr) {
            Some(slot) => {
                *slot = position;
                true
            }
            None => false,
        }
    }

    /// All nodes in address order
    pub fn nodes(&self) -> impl Iterator<Item = (Ipv4Addr, Position)> + '_ {
        self.nodes.iter().map(|(addr, pos)| (*addr, *pos))
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.nodes.keys().copied().collect()
    }

    /// Whether `a` and `b` can hear each other
    pub fn in_range(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        if a == b {
            return false;
        }
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(pa), Some(pb)) => pa.distance(pb) <= self.range,
            _ => false,
        }
    }

    /// Nodes within radio range of `addr`
    pub fn neighbors(&self, addr: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.nodes
            .keys()
            .copied()
            .filter(|other| self.in_range(addr, *other))
            .collect()
    }

    /// Minimum hop count from `from` to `to` over radio links
    pub fn hop_distance(&self, from: Ipv4Addr, to: Ipv4Addr) -> Option<usize> {
        if !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
            return None;
        }
        let mut seen = BTreeSet::from([from]);
        let mut frontier = VecDeque::from([(from, 0)]);
        while let Some((node, hops)) = frontier.pop_front() {
            if node == to {
                return Some(hops);
            }
            for next in self.neighbors(node) {
                if seen.insert(next) {
                    frontier.push_back((next, hops + 1));
                }
            }
        }
        None
    }

    /// Whether every node can reach every other over radio links
    pub fn is_connected(&self) -> bool {
        let Some(first) = self.nodes.keys().next().copied() else {
            return true;
        };
        self.nodes
            .keys()
            .all(|other| self.hop_distance(first, *other).is_some())
    }

    /// Text listing of nodes and their radio neighbors
    pub fn visualize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} nodes, radio range {:.0}m, {}",
            self.len(),
            self.range,
            if self.is_connected() { "connected" } else { "partitioned" }
        );
        for (addr, position) in self.nodes() {
            let neighbors: Vec<String> = self
                .neighbors(addr)
                .iter()
                .map(|n| n.to_string())
                .collect();
            let _ = writeln!(
                out,
                "  {addr:<12} {:<16} -> {}",
                position.to_string(),
                neighbors.join(", ")
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_topology() {
        let line = Topology::line(4, 100.0, 150.0);
        assert_eq!(line.len(), 4);
        assert_eq!(line.neighbors(node_addr(1)), vec![node_addr(0), node_addr(2)]);
        assert!(!line.in_range(node_addr(0), node_addr(2)));
        assert_eq!(line.hop_distance(node_addr(0), node_addr(3)), Some(3));
        assert!(line.is_connected());
    }

    #[test]
    fn test_grid_topology() {
        let grid = Topology::grid(3, 2, 100.0, 100.0);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid.position(node_addr(4)), Some(Position::new(100.0, 100.0)));
        // corner node reaches right and up only
        assert_eq!(grid.neighbors(node_addr(0)), vec![node_addr(1), node_addr(3)]);
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = Topology::random(20, 500.0, 500.0, 150.0, 9);
        let b = Topology::random(20, 500.0, 500.0, 150.0, 9);
        let c = Topology::random(20, 500.0, 500.0, 150.0, 10);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.nodes().all(|(_, p)| (0.0..=500.0).contains(&p.x) && (0.0..=500.0).contains(&p.y)));
    }

    #[test]
    fn test_partition_detected() {
        let split = Topology::from_positions(50.0, &[(0.0, 0.0), (40.0, 0.0), (500.0, 0.0)]);
        assert!(!split.is_connected());
        assert_eq!(split.hop_distance(node_addr(0), node_addr(2)), None);
        assert!(split.visualize().contains("partitioned"));
    }

    #[test]
    fn test_self_not_in_range() {
        let line = Topology::line(2, 10.0, 100.0);
        assert!(!line.in_range(node_addr(0), node_addr(0)));
    }
}
