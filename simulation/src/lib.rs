//! # SPY Simulation
//!
//! A deterministic simulator for the SPY geographic routing protocol.
//!
//! ## Overview
//!
//! Every simulated node runs the real [`SpyRouter`](spy_routing::SpyRouter).
//! What the simulator replaces is everything around it:
//!
//! - **Time**: a shared [`ManualClock`](spy_core::ManualClock) advanced in
//!   fixed steps, so runs are reproducible
//! - **Radio**: frames reach exactly the nodes within range of the sender,
//!   optionally with random loss
//! - **Location**: an oracle registry every node publishes into
//!
//! ## Architecture
//!
//! - **Types** (`types.rs`): node addressing, packet ids, [`SimEvent`]
//! - **Topology** (`topology.rs`): node placement (line, grid, random)
//! - **Simulation** (`simulation.rs`): the stepping engine
//! - **Scenarios** (`scenarios.rs`): pre-built runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use spy_simulation::*;
//!
//! let topology = Topology::line(5, 100.0, 150.0);
//! let mut sim = Simulation::new(topology, SimConfig::default())?;
//!
//! // let HELLOs populate the neighbor tables
//! sim.run_for(Duration::from_millis(1500));
//!
//! let id = sim.send(node_addr(0), node_addr(4), b"hello")?;
//! assert!(sim.is_delivered(id));
//! assert_eq!(sim.hops(id), Some(4));
//! ```

pub mod scenarios;
pub mod simulation;
pub mod topology;
pub mod types;

#[cfg(test)]
mod integration_scenarios;

// Re-export main types
pub use types::{FrameKind, PacketId, SimError, SimEvent, SimResult, node_addr};

pub use topology::Topology;

pub use simulation::{SimConfig, SimStats, Simulation};
