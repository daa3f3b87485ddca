//! Node context injection for multi-node logging
//!
//! Simulations run many routers on one thread. This module keeps the
//! identity of the router currently being driven in thread-local storage so
//! that spans opened while it is active can be attributed to it.

use std::cell::RefCell;
use std::net::Ipv4Addr;

use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// The router's address
    pub node: Ipv4Addr,
    /// Where the router is running
    pub node_kind: NodeKind,
    /// Unique instance ID for this router session
    pub instance_id: Uuid,
}

/// Where a router is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Driven by the deterministic simulator
    Simulated,
    /// Bound to a real socket
    Live,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Simulated => write!(f, "simulated"),
            NodeKind::Live => write!(f, "live"),
        }
    }
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// When this guard is created, it sets the node context for the current thread.
/// When it's dropped, it restores the previous context (if any).
///
/// # Example
///
/// ```ignore
/// use spy_logging::context::{NodeContextGuard, NodeKind};
///
/// let _guard = NodeContextGuard::new(addr, NodeKind::Simulated);
///
/// // Spans opened in this scope carry node = "10.0.0.1"
/// tracing::info!("polling timers");
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    /// Set `node` as the current node with a fresh instance ID
    pub fn new(node: Ipv4Addr, node_kind: NodeKind) -> Self {
        Self::with_instance_id(node, node_kind, Uuid::new_v4())
    }

    /// Create a guard with a specific instance ID
    ///
    /// Useful when one router is entered many times and its log lines
    /// should share an instance ID.
    pub fn with_instance_id(node: Ipv4Addr, node_kind: NodeKind, instance_id: Uuid) -> Self {
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow().clone());

        let new_ctx = NodeContextData {
            node,
            node_kind,
            instance_id,
        };

        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(new_ctx));

        Self { previous }
    }

    /// Get the current node context (if any)
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current node address (if set)
    pub fn current_node() -> Option<Ipv4Addr> {
        Self::current().map(|ctx| ctx.node)
    }

    /// Get the current instance ID (if set)
    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a node context set
///
/// # Example
///
/// ```ignore
/// with_node_context!(addr, NodeKind::Live, {
///     tracing::info!("datagram received");
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node:expr, $kind:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($node, $kind);
        $body
    }};
}
