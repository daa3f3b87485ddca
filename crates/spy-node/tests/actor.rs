//! Integration tests for SpyNode over in-memory links

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::time::timeout;

use spy_core::{
    DropReason, LocationRegistry, MockTransport, MockTransportBuilder, OracleLocationService,
    Position, RoutingDecision, StaticMobility,
};
use spy_node::{NodeConfig, NodeError, NodeEvent, SpyNode};
use spy_routing::{LocationServiceKind, RoutingError, SpyConfig};

const WAIT: Duration = Duration::from_secs(5);

fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn spawn_node(transport: MockTransport, position: Position, registry: &LocationRegistry) -> SpyNode {
    use spy_core::Transport;

    let address = transport.local_addr();
    registry.publish(address, position, 0);
    SpyNode::spawn(
        address,
        NodeConfig::with_router(SpyConfig::fast_hello()),
        Arc::new(transport),
        Arc::new(OracleLocationService::new(registry.clone())),
        Arc::new(StaticMobility::new(position)),
    )
    .unwrap()
}

async fn wait_for_neighbor(node: &SpyNode, neighbor: Ipv4Addr) {
    timeout(WAIT, async {
        loop {
            if node.neighbors().await.unwrap().contains(&neighbor) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("neighbor discovered by HELLO");
}

async fn next_delivery(events: &mut broadcast::Receiver<NodeEvent>) -> spy_core::DataPacket {
    timeout(WAIT, async {
        loop {
            match events.recv().await.unwrap() {
                NodeEvent::Delivered { packet } => return packet,
                NodeEvent::Dropped { .. } => continue,
            }
        }
    })
    .await
    .expect("packet delivered")
}

#[tokio::test]
async fn test_neighbors_deliver_directly() {
    let registry = LocationRegistry::new();
    let (ta, tb) = MockTransportBuilder::new().create_connected_pair(addr(1), addr(2));
    let a = spawn_node(ta, Position::new(0.0, 0.0), &registry);
    let b = spawn_node(tb, Position::new(100.0, 0.0), &registry);

    wait_for_neighbor(&a, addr(2)).await;
    let mut events = b.subscribe();

    let decision = a.send(addr(2), Bytes::from_static(b"ping")).await.unwrap();
    assert_eq!(decision.next_hop(), Some(addr(2)));

    let packet = next_delivery(&mut events).await;
    assert_eq!(packet.source, addr(1));
    assert_eq!(&packet.payload[..], b"ping");

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_relay_through_middle_node() {
    let registry = LocationRegistry::new();
    let ta = MockTransport::new(addr(1));
    let tb = MockTransport::new(addr(2));
    let tc = MockTransport::new(addr(3));
    // a and c are out of range of each other
    ta.link_to(addr(2), tb.inbox_sender());
    tb.link_to(addr(1), ta.inbox_sender());
    tb.link_to(addr(3), tc.inbox_sender());
    tc.link_to(addr(2), tb.inbox_sender());

    let a = spawn_node(ta, Position::new(0.0, 0.0), &registry);
    let b = spawn_node(tb, Position::new(100.0, 0.0), &registry);
    let c = spawn_node(tc, Position::new(200.0, 0.0), &registry);

    wait_for_neighbor(&a, addr(2)).await;
    wait_for_neighbor(&b, addr(3)).await;
    assert!(!a.neighbors().await.unwrap().contains(&addr(3)));

    let mut events = c.subscribe();
    let decision = a.send(addr(3), Bytes::from_static(b"relayed")).await.unwrap();
    assert_eq!(decision.next_hop(), Some(addr(2)));

    let packet = next_delivery(&mut events).await;
    assert_eq!(&packet.payload[..], b"relayed");

    let relay = b.stats().await.unwrap();
    assert!(relay.packets_forwarded >= 1);

    for node in [a, b, c] {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_send_to_self_is_delivered_locally() {
    let registry = LocationRegistry::new();
    let node = spawn_node(MockTransport::new(addr(1)), Position::new(0.0, 0.0), &registry);
    let mut events = node.subscribe();

    let decision = node.send(addr(1), Bytes::from_static(b"loop")).await.unwrap();
    assert!(decision.is_delivery());
    assert_eq!(&next_delivery(&mut events).await.payload[..], b"loop");

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_destination_is_dropped() {
    let registry = LocationRegistry::new();
    let node = spawn_node(MockTransport::new(addr(1)), Position::new(0.0, 0.0), &registry);

    let decision = node.send(addr(99), Bytes::from_static(b"?")).await.unwrap();
    assert_eq!(
        decision,
        RoutingDecision::Drop {
            reason: DropReason::NoRoute
        }
    );
    assert_eq!(node.stats().await.unwrap().packets_dropped, 1);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interface_down_and_up() {
    let registry = LocationRegistry::new();
    let (ta, tb) = MockTransportBuilder::new().create_connected_pair(addr(1), addr(2));
    let a = spawn_node(ta, Position::new(0.0, 0.0), &registry);
    let b = spawn_node(tb, Position::new(50.0, 0.0), &registry);
    wait_for_neighbor(&a, addr(2)).await;

    a.interface_down().await.unwrap();
    assert!(a.neighbors().await.unwrap().is_empty());
    let decision = a.send(addr(2), Bytes::from_static(b"down")).await.unwrap();
    assert_eq!(
        decision,
        RoutingDecision::Drop {
            reason: DropReason::NoRoute
        }
    );

    a.interface_up().await.unwrap();
    wait_for_neighbor(&a, addr(2)).await;

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reactive_location_service_rejected() {
    let registry = LocationRegistry::new();
    let config = NodeConfig::with_router(
        SpyConfig::default().with_location_service(LocationServiceKind::Reactive),
    );
    let result = SpyNode::spawn(
        addr(1),
        config,
        Arc::new(MockTransport::new(addr(1))),
        Arc::new(OracleLocationService::new(registry)),
        Arc::new(StaticMobility::new(Position::default())),
    );
    assert!(matches!(
        result,
        Err(NodeError::Routing(RoutingError::UnsupportedLocationService(
            LocationServiceKind::Reactive
        )))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_task() {
    let registry = LocationRegistry::new();
    let node = spawn_node(MockTransport::new(addr(1)), Position::new(0.0, 0.0), &registry);
    assert!(node.is_running());
    timeout(WAIT, node.shutdown()).await.unwrap().unwrap();
}
