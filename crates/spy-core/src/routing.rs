//! Routing types and decisions

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::packet::DataPacket;

/// Reasons a packet might be dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Destination position unknown and the location service gave up
    NoRoute,
    /// Recovery mode found no neighbor to hand the packet to
    RecoveryDeadEnd,
    /// The deferred queue was full
    QueueFull,
    /// The packet waited in the deferred queue too long
    QueueExpired,
    /// The location service stopped tracking the destination while queued
    LocationUnknown,
    /// The frame could not be decoded
    Malformed,
    /// The hop limit reached zero
    TtlExpired,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRoute => write!(f, "No route available"),
            Self::RecoveryDeadEnd => write!(f, "Recovery dead end"),
            Self::QueueFull => write!(f, "Queue full"),
            Self::QueueExpired => write!(f, "Queue timeout"),
            Self::LocationUnknown => write!(f, "Destination location unknown"),
            Self::Malformed => write!(f, "Malformed frame"),
            Self::TtlExpired => write!(f, "TTL expired"),
        }
    }
}

/// Possible outcomes of routing a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Send the packet to a neighbor
    Forward {
        next_hop: Ipv4Addr,
        packet: DataPacket,
    },

    /// The packet is addressed to this node
    Deliver { packet: DataPacket },

    /// Held in the deferred queue until the destination becomes routable
    Deferred,

    /// Drop the packet
    Drop { reason: DropReason },
}

impl RoutingDecision {
    /// Create a forward decision
    pub fn forward(next_hop: Ipv4Addr, packet: DataPacket) -> Self {
        Self::Forward { next_hop, packet }
    }

    /// Create a local delivery decision
    pub fn deliver(packet: DataPacket) -> Self {
        Self::Deliver { packet }
    }

    /// Create a drop decision
    pub fn drop(reason: DropReason) -> Self {
        Self::Drop { reason }
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward { .. })
    }

    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Deliver { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop { .. })
    }

    /// Next hop of a forward decision
    pub fn next_hop(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Forward { next_hop, .. } => Some(*next_hop),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> DataPacket {
        DataPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), &b"x"[..])
    }

    #[test]
    fn test_forward_decision() {
        let hop = Ipv4Addr::new(10, 0, 0, 5);
        let decision = RoutingDecision::forward(hop, packet());

        assert!(decision.is_forward());
        assert!(!decision.is_delivery());
        assert!(!decision.is_deferred());
        assert!(!decision.is_drop());
        assert_eq!(decision.next_hop(), Some(hop));
    }

    #[test]
    fn test_drop_decision() {
        let decision = RoutingDecision::drop(DropReason::RecoveryDeadEnd);
        assert!(decision.is_drop());
        assert_eq!(decision.next_hop(), None);

        if let RoutingDecision::Drop { reason } = decision {
            assert_eq!(reason, DropReason::RecoveryDeadEnd);
        } else {
            panic!("Expected Drop");
        }
    }

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::NoRoute.to_string(), "No route available");
        assert_eq!(DropReason::QueueExpired.to_string(), "Queue timeout");
    }
}
