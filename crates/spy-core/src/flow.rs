//! Flow identification for the two disjoint paths of a source

use std::fmt::Display;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::wire::PathId;

/// Identifies one of the two alternating logical paths between a source and
/// a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub path_bit: u8,
}

impl FlowKey {
    /// Create a flow key; any non-zero path bit is normalised to 1
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, path_bit: u8) -> Self {
        Self {
            source,
            destination,
            path_bit: u8::from(path_bit != 0),
        }
    }

    /// The key of the other disjoint path between the same endpoints
    pub fn inverse(&self) -> Self {
        Self {
            path_bit: self.path_bit ^ 1,
            ..*self
        }
    }

    /// Wire form of this key
    pub fn path_id(&self) -> PathId {
        PathId {
            source: self.source,
            destination: self.destination,
            id_bit: self.path_bit,
        }
    }
}

impl From<PathId> for FlowKey {
    fn from(id: PathId) -> Self {
        FlowKey::new(id.source, id.destination, id.id_bit)
    }
}

impl From<&PathId> for FlowKey {
    fn from(id: &PathId) -> Self {
        FlowKey::new(id.source, id.destination, id.id_bit)
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}#{}", self.source, self.destination, self.path_bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse() {
        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 9), 0);
        let inverse = key.inverse();

        assert_eq!(inverse.path_bit, 1);
        assert_eq!(inverse.source, key.source);
        assert_eq!(inverse.destination, key.destination);
        assert_eq!(inverse.inverse(), key);
        assert_ne!(inverse, key);
    }

    #[test]
    fn test_path_bit_normalised() {
        let key = FlowKey::new(Ipv4Addr::LOCALHOST, Ipv4Addr::BROADCAST, 7);
        assert_eq!(key.path_bit, 1);
        assert_eq!(key.inverse().path_bit, 0);
    }

    #[test]
    fn test_path_id_conversion() {
        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1);
        let id = key.path_id();
        assert_eq!(FlowKey::from(id), key);
        assert_eq!(FlowKey::from(&id), key);
    }

    #[test]
    fn test_display() {
        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1);
        assert_eq!(key.to_string(), "10.0.0.1->10.0.0.2#1");
    }
}
