//! Configuration for the node driver

use serde::{Deserialize, Serialize};
use spy_routing::SpyConfig;

/// Configuration for a [`SpyNode`](crate::SpyNode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Protocol parameters handed to the router
    pub router: SpyConfig,
    /// Capacity of the command channel into the actor
    pub command_channel_capacity: usize,
    /// Event broadcast channel capacity
    pub event_channel_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            router: SpyConfig::default(),
            command_channel_capacity: 256,
            event_channel_capacity: 1024,
        }
    }
}

impl NodeConfig {
    /// Create a configuration around specific protocol parameters
    pub fn with_router(router: SpyConfig) -> Self {
        Self {
            router,
            ..Self::default()
        }
    }

    /// Set the command channel capacity
    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = NodeConfig::with_router(SpyConfig::fast_hello())
            .with_command_channel_capacity(8)
            .with_event_channel_capacity(16);
        assert_eq!(config.router, SpyConfig::fast_hello());
        assert_eq!(config.command_channel_capacity, 8);
        assert_eq!(config.event_channel_capacity, 16);
    }
}
