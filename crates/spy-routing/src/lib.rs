//! # SPY Routing
//!
//! Routing engine for the SPY position-based ad-hoc routing protocol.
//!
//! Each node knows only the positions of its one-hop neighbors (learned
//! from HELLO broadcasts) and an estimate of the destination's position
//! (from a location service). From that it forwards packets greedily,
//! falls back to right-hand-rule recovery around voids, and over time
//! discovers shortcuts between the two alternating disjoint paths each
//! source uses.
//!
//! ## Core Components
//!
//! - [`SpyRouter`]: The per-node reactor; all protocol state lives here
//! - [`PositionTable`]: Neighbor positions plus time-bounded suppression sets
//! - [`RequestQueue`]: Packets waiting for their destination to become routable
//! - [`ParityTracker`]: Per-source parity observations for shortcut discovery
//! - [`Timers`]: One-shot timers polled by the driver
//! - [`SpyConfig`]: Protocol parameters
//!
//! ## Driving a router
//!
//! The router performs no I/O and reads time only through the injected
//! [`Clock`](spy_core::Clock). A driver owns it exclusively and:
//!
//! 1. calls [`SpyRouter::start`] once
//! 2. hands every received datagram to [`SpyRouter::handle_datagram`]
//! 3. hands every locally originated packet to [`SpyRouter::route_output`]
//! 4. sleeps until [`SpyRouter::next_deadline`] and calls [`SpyRouter::poll_timers`]
//! 5. after each of the above, transmits whatever [`SpyRouter::take_outbound`] returns
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spy_core::{ManualClock, OracleLocationService, StaticMobility, LocationRegistry};
//! use spy_routing::{SpyConfig, SpyRouter};
//!
//! let mut router = SpyRouter::new(
//!     addr,
//!     SpyConfig::default(),
//!     Arc::new(ManualClock::new()),
//!     Arc::new(OracleLocationService::new(registry)),
//!     Arc::new(StaticMobility::new(position)),
//! )?;
//! router.start();
//!
//! match router.route_output(packet) {
//!     RoutingDecision::Forward { next_hop, packet } => { /* send packet.encode()? */ }
//!     RoutingDecision::Deferred => { /* drained later via poll_timers */ }
//!     RoutingDecision::Drop { reason } => { /* report */ }
//!     RoutingDecision::Deliver { .. } => { /* addressed to ourselves */ }
//! }
//! for effect in router.take_outbound() {
//!     if let Some((dest, frame)) = effect.to_datagram()? { /* send */ }
//! }
//! ```

pub mod config;
pub mod error;
pub mod parity;
pub mod queue;
pub mod router;
pub mod shortcut;
pub mod table;
pub mod timer;

// Re-export main types
pub use config::{ConfigWarning, LocationServiceKind, SpyConfig};
pub use error::{RoutingError, RoutingResult};
pub use parity::{ParityState, ParityTracker};
pub use queue::{QueueEntry, RequestQueue};
pub use router::{Outbound, RouterStats, SpyRouter};
pub use table::{NeighborEntry, PositionTable};
pub use timer::{TimerKind, Timers};

// Re-export core routing types for convenience
pub use spy_core::{DropReason, RoutingDecision};
