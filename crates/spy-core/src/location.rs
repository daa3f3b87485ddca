//! Oracle location service
//!
//! Every node publishes its own position into a shared [`LocationRegistry`].
//! Each service instance keeps a local view of what it has looked up: the
//! registry refreshes it, and a node withdrawn from the registry stays in the
//! view at its last known position until the view is cleared. Answers are
//! always immediate, so nothing is ever "in search".

use std::net::Ipv4Addr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::Position;
use crate::traits::LocationService;

/// A published position and its whole-second stamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub position: Position,
    pub updated: u32,
}

/// Shared table of every node's position
#[derive(Debug, Clone, Default)]
pub struct LocationRegistry {
    records: Arc<DashMap<Ipv4Addr, LocationRecord>>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or overwrite the position of `addr`
    pub fn publish(&self, addr: Ipv4Addr, position: Position, updated: u32) {
        self.records.insert(addr, LocationRecord { position, updated });
    }

    /// Remove `addr` from the registry
    pub fn withdraw(&self, addr: Ipv4Addr) {
        self.records.remove(&addr);
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<LocationRecord> {
        self.records.get(&addr).map(|r| *r)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.records.contains_key(&addr)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Location service backed by a [`LocationRegistry`]
///
/// Lookups are answered from a per-node view that
/// [`clear`](LocationService::clear) discards; the registry itself is never
/// modified by this service.
#[derive(Debug, Clone)]
pub struct OracleLocationService {
    registry: LocationRegistry,
    view: Arc<DashMap<Ipv4Addr, LocationRecord>>,
}

impl OracleLocationService {
    pub fn new(registry: LocationRegistry) -> Self {
        Self {
            registry,
            view: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &LocationRegistry {
        &self.registry
    }

    fn lookup(&self, addr: Ipv4Addr) -> Option<LocationRecord> {
        match self.registry.get(addr) {
            Some(record) => {
                self.view.insert(addr, record);
                Some(record)
            }
            None => self.view.get(&addr).map(|r| *r),
        }
    }

    /// Number of destinations in the local view
    pub fn cached(&self) -> usize {
        self.view.len()
    }
}

impl LocationService for OracleLocationService {
    fn position(&self, addr: Ipv4Addr) -> Option<Position> {
        let record = self.lookup(addr);
        trace!(dst = %addr, found = record.is_some(), "oracle lookup");
        record.map(|r| r.position)
    }

    fn entry_update_time(&self, addr: Ipv4Addr) -> u32 {
        self.lookup(addr).map(|r| r.updated).unwrap_or(0)
    }

    fn is_in_search(&self, _addr: Ipv4Addr) -> bool {
        false
    }

    fn has_position(&self, addr: Ipv4Addr) -> bool {
        self.registry.contains(addr)
    }

    fn clear(&self) {
        self.view.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_registry_publish_and_withdraw() {
        let registry = LocationRegistry::new();
        registry.publish(addr(1), Position::new(1.0, 2.0), 5);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(addr(1)).unwrap().updated, 5);

        registry.publish(addr(1), Position::new(3.0, 2.0), 6);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(addr(1)).unwrap().position, Position::new(3.0, 2.0));

        registry.withdraw(addr(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_oracle_lookups() {
        let registry = LocationRegistry::new();
        registry.publish(addr(2), Position::new(10.0, 0.0), 7);
        let oracle = OracleLocationService::new(registry.clone());

        assert_eq!(oracle.position(addr(2)), Some(Position::new(10.0, 0.0)));
        assert_eq!(oracle.entry_update_time(addr(2)), 7);
        assert!(oracle.has_position(addr(2)));
        assert!(!oracle.is_in_search(addr(2)));

        assert_eq!(oracle.position(addr(3)), None);
        assert_eq!(oracle.entry_update_time(addr(3)), 0);
        assert!(!oracle.has_position(addr(3)));
        assert!(!oracle.is_in_search(addr(3)));
    }

    #[test]
    fn test_oracle_sees_registry_updates() {
        let registry = LocationRegistry::new();
        let oracle = OracleLocationService::new(registry.clone());
        assert!(!oracle.has_position(addr(4)));

        registry.publish(addr(4), Position::new(1.0, 1.0), 1);
        assert!(oracle.has_position(addr(4)));
        assert_eq!(oracle.position(addr(4)), Some(Position::new(1.0, 1.0)));
    }

    #[test]
    fn test_clear_keeps_registry() {
        let registry = LocationRegistry::new();
        registry.publish(addr(5), Position::new(0.0, 0.0), 1);
        let oracle = OracleLocationService::new(registry.clone());

        oracle.position(addr(5));
        assert_eq!(oracle.cached(), 1);

        oracle.clear();
        assert_eq!(oracle.cached(), 0);
        assert!(oracle.has_position(addr(5)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_withdrawn_node_known_until_clear() {
        let registry = LocationRegistry::new();
        registry.publish(addr(6), Position::new(4.0, 2.0), 3);
        let oracle = OracleLocationService::new(registry.clone());
        assert_eq!(oracle.position(addr(6)), Some(Position::new(4.0, 2.0)));

        registry.withdraw(addr(6));
        assert_eq!(oracle.position(addr(6)), Some(Position::new(4.0, 2.0)));
        assert_eq!(oracle.entry_update_time(addr(6)), 3);
        assert!(!oracle.has_position(addr(6)));

        // another node never looked it up
        let fresh = OracleLocationService::new(registry.clone());
        assert_eq!(fresh.position(addr(6)), None);

        oracle.clear();
        assert_eq!(oracle.position(addr(6)), None);
        assert_eq!(oracle.entry_update_time(addr(6)), 0);
    }
}
