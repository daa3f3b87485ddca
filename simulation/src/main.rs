//! SPY simulator
//!
//! Runs the SPY geographic router on simulated radio fields under a
//! manual clock.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use spy_core::Position;
use spy_logging::{LogConfig, SpySubscriberBuilder};
use spy_simulation::{SimConfig, Simulation, Topology, node_addr, scenarios};

#[derive(Parser)]
#[command(
    name = "spy-sim",
    about = "Deterministic simulation of the SPY geographic routing protocol",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write JSONL logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Dump the event log of the run as JSON lines
    #[arg(long, global = true)]
    events: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Greedy forwarding along a line of nodes
    Line {
        /// Number of nodes
        #[arg(short, long, default_value = "5")]
        nodes: usize,
    },

    /// Recovery around a void
    Void,

    /// Steady traffic over a random field
    Flow {
        /// Number of nodes
        #[arg(short, long, default_value = "30")]
        nodes: usize,

        /// Seed for placement, jitter and flow selection
        #[arg(short, long, default_value = "7")]
        seed: u64,

        /// Seconds of traffic
        #[arg(long, default_value = "10")]
        seconds: u64,
    },

    /// A relay fails and comes back
    Failure,

    /// Build and print a field
    Topology {
        /// Layout: line, grid, random
        #[arg(short, long, default_value = "grid")]
        layout: String,

        /// Number of nodes
        #[arg(short, long, default_value = "9")]
        nodes: usize,

        /// Radio range in meters
        #[arg(short, long, default_value = "150")]
        range: f64,

        /// Seed for the random layout
        #[arg(short, long, default_value = "7")]
        seed: u64,
    },

    /// Drive a random field by hand
    Interactive {
        /// Number of nodes
        #[arg(short, long, default_value = "12")]
        nodes: usize,

        /// Seed for placement
        #[arg(short, long, default_value = "7")]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match &cli.log_dir {
        Some(dir) => LogConfig::simulation(dir),
        None => LogConfig::development(),
    };
    let _log_guard = SpySubscriberBuilder::new()
        .with_config(log_config)
        .with_level(if cli.verbose { "debug" } else { "info" })
        .init();

    let sim = match cli.command {
        Commands::Line { nodes } => Some(scenarios::run_line_scenario(nodes)?),
        Commands::Void => Some(scenarios::run_void_scenario()?),
        Commands::Flow {
            nodes,
            seed,
            seconds,
        } => Some(scenarios::run_flow_scenario(
            nodes,
            seed,
            Duration::from_secs(seconds),
        )?),
        Commands::Failure => Some(scenarios::run_failure_scenario()?),
        Commands::Topology {
            layout,
            nodes,
            range,
            seed,
        } => {
            println!("{}", build_topology(&layout, nodes, range, seed).visualize());
            None
        }
        Commands::Interactive { nodes, seed } => {
            let topology = Topology::random(nodes.max(2), 600.0, 600.0, 200.0, seed);
            Some(run_interactive(topology, seed)?)
        }
    };

    if let (Some(sim), Some(path)) = (sim, cli.events) {
        write_events(&sim, &path).with_context(|| format!("writing {}", path.display()))?;
        println!("\nWrote {} events to {}", sim.event_log.len(), path.display());
    }

    Ok(())
}

fn build_topology(layout: &str, nodes: usize, range: f64, seed: u64) -> Topology {
    match layout {
        "line" => Topology::line(nodes, 100.0, range),
        "random" => Topology::random(nodes, 600.0, 600.0, range, seed),
        "grid" => {
            let columns = (nodes as f64).sqrt().ceil().max(1.0) as usize;
            Topology::grid(columns, nodes.div_ceil(columns), 100.0, range)
        }
        other => {
            eprintln!("Unknown layout: {}. Using grid.", other);
            build_topology("grid", nodes, range, seed)
        }
    }
}

fn write_events(sim: &Simulation, path: &Path) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for event in &sim.event_log {
        serde_json::to_writer(&mut out, event)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Accepts a 1-based node number or a full address
fn parse_node(s: &str) -> Option<Ipv4Addr> {
    if let Ok(addr) = s.parse::<Ipv4Addr>() {
        return Some(addr);
    }
    s.parse::<usize>()
        .ok()
        .filter(|n| *n >= 1)
        .map(|n| node_addr(n - 1))
}

fn run_interactive(topology: Topology, seed: u64) -> anyhow::Result<Simulation> {
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(topology, SimConfig::default().with_seed(seed))?;
    sim.run_for(scenarios::WARMUP);

    println!("\nInteractive mode. Nodes are numbered from 1. Commands:");
    println!("  send <from> <to> <msg> - Originate a packet");
    println!("  step [ms]              - Advance time (default 100ms)");
    println!("  move <node> <x> <y>    - Move a node");
    println!("  down <node>            - Take a node's interface down");
    println!("  up <node>              - Bring it back");
    println!("  neighbors <node>       - Show a node's neighbor table");
    println!("  status                 - Show current state");
    println!("  stats                  - Show statistics");
    println!("  events                 - Show event log");
    println!("  quit                   - Exit");
    println!();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some(command) = parts.first() else {
            continue;
        };
        let node = parts.get(1).and_then(|s| parse_node(s));

        match *command {
            "send" => match (node, parts.get(2).and_then(|s| parse_node(s))) {
                (Some(from), Some(to)) => {
                    let message = parts[3..].join(" ");
                    match sim.send(from, to, message.as_bytes()) {
                        Ok(id) => println!(
                            "  Packet {id} {from} -> {to}: delivered={}",
                            sim.is_delivered(id)
                        ),
                        Err(e) => println!("  {e}"),
                    }
                }
                _ => println!("  Usage: send <from> <to> <message>"),
            },
            "step" => {
                let ms: u64 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
                sim.run_for(Duration::from_millis(ms));
                println!("  {}", sim.state_summary());
            }
            "move" => {
                let x = parts.get(2).and_then(|s| s.parse::<f64>().ok());
                let y = parts.get(3).and_then(|s| s.parse::<f64>().ok());
                match (node, x, y) {
                    (Some(node), Some(x), Some(y)) => match sim.move_node(node, Position::new(x, y)) {
                        Ok(()) => println!("  {node} moved to ({x}, {y})"),
                        Err(e) => println!("  {e}"),
                    },
                    _ => println!("  Usage: move <node> <x> <y>"),
                }
            }
            "down" | "up" => match node {
                Some(node) => {
                    let result = if *command == "down" {
                        sim.fail_node(node)
                    } else {
                        sim.restore_node(node)
                    };
                    match result {
                        Ok(()) => println!("  {node} is {command}"),
                        Err(e) => println!("  {e}"),
                    }
                }
                None => println!("  Usage: {command} <node>"),
            },
            "neighbors" => match node.and_then(|n| sim.router(n)) {
                Some(router) => {
                    for neighbor in router.table().neighbors() {
                        let position = router.table().position(neighbor).unwrap_or_default();
                        println!("    {neighbor} at {position}");
                    }
                }
                None => println!("  Usage: neighbors <node>"),
            },
            "status" => println!("  {}", sim.state_summary()),
            "stats" => scenarios::print_summary(&sim),
            "events" => {
                println!("  Event log ({} events):", sim.event_log.len());
                for event in sim.event_log.iter().rev().take(20) {
                    println!("    {:?}", event);
                }
                if sim.event_log.len() > 20 {
                    println!("    ... ({} more)", sim.event_log.len() - 20);
                }
            }
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                break;
            }
            other => println!("  Unknown command: {}", other),
        }
    }

    Ok(sim)
}
