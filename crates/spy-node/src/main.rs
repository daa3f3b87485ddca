//! SPY node - run one router on a real UDP link
//!
//! Destination positions come from a static table given on the command
//! line, published into an in-process oracle registry.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn};

use spy_core::{LocationRegistry, OracleLocationService, Position, SPY_PORT, StaticMobility};
use spy_logging::{FileConfig, LogConfig, SpySubscriberBuilder};
use spy_node::{NodeConfig, NodeEvent, SpyNode, UdpTransport};
use spy_routing::SpyConfig;

#[derive(Parser)]
#[command(
    name = "spy-node",
    about = "Run a SPY position-based router on the control port",
    version
)]
struct Cli {
    /// Address this node announces and routes as
    #[arg(long)]
    addr: Ipv4Addr,

    /// Own position as `x,y`
    #[arg(long, value_parser = parse_position)]
    position: Position,

    /// Control port shared by every node on the link
    #[arg(long, default_value_t = SPY_PORT)]
    port: u16,

    /// Destination of HELLO broadcasts
    #[arg(long, default_value_t = Ipv4Addr::BROADCAST)]
    broadcast: Ipv4Addr,

    /// Known node position as `addr=x,y`; may be repeated
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<(Ipv4Addr, Position)>,

    /// Periodically send a packet to this address
    #[arg(long)]
    send_to: Option<Ipv4Addr>,

    /// Milliseconds between packets sent with --send-to
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Announce four times a second instead of once
    #[arg(long)]
    fast_hello: bool,

    /// Write JSONL logs to this directory instead of the console
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Human-readable console output
    #[arg(short, long)]
    pretty: bool,
}

fn parse_position(s: &str) -> Result<Position, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y, got {s:?}"))?;
    let x = x.trim().parse::<f64>().map_err(|e| format!("bad x: {e}"))?;
    let y = y.trim().parse::<f64>().map_err(|e| format!("bad y: {e}"))?;
    Ok(Position::new(x, y))
}

fn parse_peer(s: &str) -> Result<(Ipv4Addr, Position), String> {
    let (addr, position) = s
        .split_once('=')
        .ok_or_else(|| format!("expected addr=x,y, got {s:?}"))?;
    let addr = addr
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|e| format!("bad address: {e}"))?;
    Ok((addr, parse_position(position)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match &cli.log_dir {
        Some(dir) => LogConfig::node(dir).with_file(FileConfig::new(dir, format!("spy-{}", cli.addr))),
        None if cli.pretty => LogConfig::development(),
        None => LogConfig::default(),
    };
    let _log_guard = SpySubscriberBuilder::new().with_config(log_config).init();

    let registry = LocationRegistry::new();
    registry.publish(cli.addr, cli.position, 0);
    for (addr, position) in &cli.peers {
        registry.publish(*addr, *position, 0);
    }

    let router_config = if cli.fast_hello {
        SpyConfig::fast_hello()
    } else {
        SpyConfig::default()
    }
    .with_control_port(cli.port)
    .with_broadcast(cli.broadcast);

    let transport = UdpTransport::bind(cli.addr, cli.port)
        .await
        .with_context(|| format!("binding UDP port {}", cli.port))?;

    let node = SpyNode::spawn(
        cli.addr,
        NodeConfig::with_router(router_config),
        Arc::new(transport),
        Arc::new(OracleLocationService::new(registry)),
        Arc::new(StaticMobility::new(cli.position)),
    )?;
    let mut events = node.subscribe();
    info!(node = %cli.addr, position = %cli.position, peers = cli.peers.len(), "node running");

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick(), if cli.send_to.is_some() => {
                if let Some(destination) = cli.send_to {
                    sequence += 1;
                    let payload = Bytes::from(format!("seq {sequence}"));
                    let decision = node.send(destination, payload).await?;
                    info!(dst = %destination, sequence, decision = ?decision, "packet originated");
                }
            }
            event = events.recv() => match event {
                Ok(NodeEvent::Delivered { packet }) => {
                    info!(src = %packet.source, payload = %String::from_utf8_lossy(&packet.payload), "received");
                }
                Ok(NodeEvent::Dropped { destination, reason }) => {
                    warn!(dst = ?destination, reason = %reason, "dropped");
                }
                Err(e) => warn!(error = %e, "event stream lagged"),
            },
        }
    }

    let stats = node.stats().await?;
    info!(?stats, "shutting down");
    node.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let (addr, position) = parse_peer("10.0.0.7=120.5, 40").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(position, Position::new(120.5, 40.0));

        assert!(parse_peer("10.0.0.7").is_err());
        assert!(parse_peer("nope=1,2").is_err());
        assert!(parse_position("1;2").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "spy-node",
            "--addr",
            "10.0.0.1",
            "--position",
            "0,0",
            "--peer",
            "10.0.0.2=100,0",
            "--peer",
            "10.0.0.3=200,0",
            "--send-to",
            "10.0.0.3",
        ])
        .unwrap();
        assert_eq!(cli.port, SPY_PORT);
        assert_eq!(cli.peers.len(), 2);
        assert_eq!(cli.send_to, Some(Ipv4Addr::new(10, 0, 0, 3)));
    }
}
