//! Pre-defined simulation scenarios for SPY
//!
//! Each scenario builds a field, lets HELLOs populate the neighbor tables,
//! pushes some traffic through and prints what happened.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::simulation::{SimConfig, Simulation};
use crate::topology::Topology;
use crate::types::{SimEvent, SimResult, node_addr};

/// Long enough for every node to have heard every neighbor at least once
pub const WARMUP: Duration = Duration::from_millis(1500);

/// Scenario: greedy forwarding along a line
///
/// ```text
/// 1 -- 2 -- 3 -- ... -- n
/// ```
///
/// Node 1 sends to node n; each hop is strictly closer so the packet never
/// leaves greedy mode.
pub fn run_line_scenario(nodes: usize) -> SimResult<Simulation> {
    info!(nodes, "=== Running Line Scenario ===");

    let topology = Topology::line(nodes.max(2), 100.0, 150.0);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(topology, SimConfig::default())?;

    println!("\n--- Step 1: HELLO warm-up ---");
    sim.run_for(WARMUP);
    println!("  {}", sim.state_summary());

    println!("\n--- Step 2: first node sends to last ---");
    let source = node_addr(0);
    let destination = node_addr(nodes.max(2) - 1);
    let id = sim.send(source, destination, b"along the line")?;
    sim.run_for(Duration::from_millis(100));
    println!(
        "  packet {id}: delivered={}, hops={:?}",
        sim.is_delivered(id),
        sim.hops(id)
    );
    println!("  {}", sim.state_summary());

    print_summary(&sim);
    Ok(sim)
}

/// Scenario: right-hand-rule recovery around a void
///
/// ```text
///            B
///      A           C
///
///      S   (void)  D
/// ```
///
/// S has no neighbor closer to D than itself, so the packet enters recovery
/// at S and walks the face S -> A -> B -> C -> D.
pub fn run_void_scenario() -> SimResult<Simulation> {
    info!("=== Running Void Recovery Scenario ===");

    let topology = void_topology();
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(topology, SimConfig::default())?;

    println!("\n--- Step 1: HELLO warm-up ---");
    sim.run_for(WARMUP);

    println!("\n--- Step 2: S sends to D across the void ---");
    let id = sim.send(node_addr(0), node_addr(4), b"around the void")?;
    println!("  deferred at S, waiting for the queue drain");

    sim.run_for(Duration::from_millis(600));
    println!(
        "  packet {id}: delivered={}, hops={:?}",
        sim.is_delivered(id),
        sim.hops(id)
    );
    for (from, to) in sim.data_hops() {
        println!("    {from} -> {to}");
    }
    println!("  {}", sim.state_summary());

    print_summary(&sim);
    Ok(sim)
}

/// The five-node field used by [`run_void_scenario`]
pub fn void_topology() -> Topology {
    Topology::from_positions(
        120.0,
        &[
            (0.0, 0.0),     // S
            (0.0, 100.0),   // A
            (100.0, 150.0), // B
            (200.0, 100.0), // C
            (200.0, 0.0),   // D
        ],
    )
}

/// Scenario: steady traffic over a random field
///
/// A handful of source/destination pairs each send a packet every 250ms.
/// Consecutive packets of a pair alternate between the two disjoint paths,
/// which is what drives shortcut discovery.
pub fn run_flow_scenario(nodes: usize, seed: u64, duration: Duration) -> SimResult<Simulation> {
    info!(nodes, seed, ?duration, "=== Running Flow Scenario ===");

    let topology = Topology::random(nodes.max(2), 600.0, 600.0, 200.0, seed);
    println!("{}", topology.visualize());

    let config = SimConfig::default().with_seed(seed);
    let mut sim = Simulation::new(topology, config)?;
    sim.run_for(WARMUP);

    let mut rng = StdRng::seed_from_u64(seed);
    let count = nodes.max(2);
    let pairs: Vec<_> = (0..3)
        .map(|_| {
            let source = rng.random_range(0..count);
            let mut destination = rng.random_range(0..count - 1);
            if destination >= source {
                destination += 1;
            }
            (node_addr(source), node_addr(destination))
        })
        .collect();

    println!("\n--- Flows ---");
    for (source, destination) in &pairs {
        let hops = sim.topology().hop_distance(*source, *destination);
        println!("  {source} -> {destination} (shortest {hops:?} hops)");
    }

    let interval = Duration::from_millis(250);
    let end = sim.elapsed() + duration;
    while sim.elapsed() < end {
        for (source, destination) in &pairs {
            sim.send(*source, *destination, b"flow")?;
        }
        sim.run_for(interval);
    }
    // let stragglers drain
    sim.run_for(Duration::from_secs(1));
    println!("\n  {}", sim.state_summary());

    print_summary(&sim);
    Ok(sim)
}

/// Scenario: a relay fails and comes back
///
/// ```text
/// 1 -- 2 -- 3
/// |    |    |
/// 4 -- 5 -- 6
/// |    |    |
/// 7 -- 8 -- 9
/// ```
///
/// Traffic from 1 to 9 keeps flowing while 5 is down, over the outer ring.
pub fn run_failure_scenario() -> SimResult<Simulation> {
    info!("=== Running Node Failure Scenario ===");

    let topology = Topology::grid(3, 3, 100.0, 110.0);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(topology, SimConfig::default())?;
    sim.run_for(WARMUP);

    let source = node_addr(0);
    let destination = node_addr(8);
    let relay = node_addr(4);

    println!("\n--- Step 1: traffic with every node up ---");
    sim.send(source, destination, b"before")?;
    sim.run_for(Duration::from_millis(500));
    println!("  {}", sim.state_summary());

    println!("\n--- Step 2: {relay} goes down ---");
    sim.fail_node(relay)?;
    // neighbors forget the failed node once its entry ages out
    sim.run_for(Duration::from_secs(3));
    sim.send(source, destination, b"during")?;
    sim.run_for(Duration::from_millis(500));
    println!("  {}", sim.state_summary());

    println!("\n--- Step 3: {relay} comes back ---");
    sim.restore_node(relay)?;
    sim.run_for(WARMUP);
    sim.send(source, destination, b"after")?;
    sim.run_for(Duration::from_millis(500));
    println!("  {}", sim.state_summary());

    print_summary(&sim);
    Ok(sim)
}

/// Print statistics and the notable events of a finished run
pub fn print_summary(sim: &Simulation) {
    let stats = &sim.stats;
    println!("\n=== Final Statistics ===");
    println!("  Packets originated: {}", stats.originated);
    println!(
        "  Packets delivered: {} ({:.1}%)",
        stats.delivered,
        stats.delivery_ratio() * 100.0
    );
    println!("  Packets dropped: {}", stats.dropped);
    for (reason, count) in &stats.drops_by_reason {
        println!("    {reason}: {count}");
    }
    println!("  Average hops: {:.2}", stats.average_hops());
    println!("  Average latency: {:?}", stats.average_latency());
    println!(
        "  Frames: {} sent, {} lost, {} control",
        stats.frames_transmitted, stats.frames_lost, stats.control_frames
    );
    println!(
        "  Recovery entries: {}",
        sim.router_total(|s| s.recovery_entries)
    );
    println!(
        "  Shortcuts installed: {}",
        sim.router_total(|s| s.shortcuts_installed)
    );

    println!("\n=== Deliveries and Drops ===");
    for event in &sim.event_log {
        if matches!(event, SimEvent::Delivered { .. } | SimEvent::Dropped { .. }) {
            println!("  {:?}", event);
        }
    }
}
