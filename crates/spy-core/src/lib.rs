//! # SPY Core
//!
//! Core types, wire codec, and service abstractions for the SPY
//! position-based routing protocol.
//!
//! The routing engine in `spy-routing` never talks to the outside world
//! directly. Everything it consumes is described here as a trait so the
//! same engine runs inside the deterministic simulator and on a real UDP
//! socket.
//!
//! ## Key Traits
//!
//! - [`Clock`]: Monotonic time source (real or manually advanced)
//! - [`LocationService`]: Maps a destination address to an estimated position
//! - [`Mobility`]: Reports the local node's own position
//! - [`Transport`]: Sends and receives control-port datagrams
//!
//! ## Key Types
//!
//! - [`Position`]: A planar coordinate with distance and angle helpers
//! - [`FlowKey`]: `(source, destination, path bit)` identifying one disjoint path
//! - [`DataPacket`]: An application packet carrying the routing headers
//! - [`ControlMessage`]: The decoded form of every control-port frame
//! - [`RoutingDecision`]: What the engine decided to do with a packet

pub mod error;
pub mod flow;
pub mod geometry;
pub mod location;
pub mod mock_transport;
pub mod packet;
pub mod routing;
pub mod traits;
pub mod transport;
pub mod wire;

// Re-export main types
pub use error::*;
pub use flow::*;
pub use geometry::*;
pub use location::*;
pub use mock_transport::*;
pub use packet::*;
pub use routing::*;
pub use traits::*;
pub use transport::*;
pub use wire::{
    ControlMessage, DisjointHeader, HelloHeader, IntersectionProbe, MessageType, NeighIntersection,
    PathId, PositionHeader, TakeShortcut, TypeHeader, WireHeader, peek_type,
};

/// UDP port used for all SPY control traffic
pub const SPY_PORT: u16 = 666;
