//! Core types for the SPY simulation
//!
//! Nodes are addressed `10.0.0.1`, `10.0.0.2`, ... in the order they are
//! added, and everything that happens on the simulated radio is recorded as
//! a [`SimEvent`].

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use spy_core::{DropReason, MessageType, Position};
use spy_routing::RoutingError;

/// First address handed out by [`node_addr`]
const BASE_ADDR: u32 = u32::from_be_bytes([10, 0, 0, 0]);

/// Address of the `index`-th node (zero based)
pub fn node_addr(index: usize) -> Ipv4Addr {
    Ipv4Addr::from(BASE_ADDR + 1 + index as u32)
}

/// Identifier the simulation assigns to each originated packet
///
/// Carried in the first eight payload bytes so deliveries can be matched
/// to their origination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId(pub u64);

impl PacketId {
    pub const LEN: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        self.0.to_be_bytes()
    }

    /// Read the id back from a payload built by the simulation
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::LEN] = payload.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something observed during a simulation run
///
/// `at` is the simulated time since the run started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    /// A node handed a packet to its router
    Originated {
        at: Duration,
        packet: PacketId,
        source: Ipv4Addr,
        destination: Ipv4Addr,
    },
    /// A frame went on the air
    Transmitted {
        at: Duration,
        from: Ipv4Addr,
        to: Ipv4Addr,
        kind: FrameKind,
    },
    /// A frame was lost on the radio
    Lost {
        at: Duration,
        from: Ipv4Addr,
        to: Ipv4Addr,
    },
    Delivered {
        at: Duration,
        packet: Option<PacketId>,
        node: Ipv4Addr,
        source: Ipv4Addr,
    },
    Dropped {
        at: Duration,
        node: Ipv4Addr,
        destination: Option<Ipv4Addr>,
        reason: DropReason,
    },
    /// A node moved
    Moved {
        at: Duration,
        node: Ipv4Addr,
        position: Position,
    },
    InterfaceDown { at: Duration, node: Ipv4Addr },
    InterfaceUp { at: Duration, node: Ipv4Addr },
}

impl SimEvent {
    pub fn at(&self) -> Duration {
        match self {
            Self::Originated { at, .. }
            | Self::Transmitted { at, .. }
            | Self::Lost { at, .. }
            | Self::Delivered { at, .. }
            | Self::Dropped { at, .. }
            | Self::Moved { at, .. }
            | Self::InterfaceDown { at, .. }
            | Self::InterfaceUp { at, .. } => *at,
        }
    }
}

/// Frame types as recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Hello,
    Data,
    NeighIntersection,
    TakeShortcut,
    InAnalysis,
    SetPath,
}

impl FrameKind {
    /// Shortcut-discovery traffic
    pub fn is_shortcut(&self) -> bool {
        !matches!(self, Self::Hello | Self::Data)
    }
}

impl From<MessageType> for FrameKind {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Hello => Self::Hello,
            MessageType::Position => Self::Data,
            MessageType::NeighIntersection => Self::NeighIntersection,
            MessageType::TakeShortcut => Self::TakeShortcut,
            MessageType::InAnalysis => Self::InAnalysis,
            MessageType::SetPath => Self::SetPath,
        }
    }
}

/// Errors raised while building or driving a simulation
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Unknown node: {0}")]
    UnknownNode(Ipv4Addr),
}

pub type SimResult<T> = Result<T, SimError>;
