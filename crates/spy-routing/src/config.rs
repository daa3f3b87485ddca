//! Router configuration
//!
//! A plain struct built once at startup and handed to [`SpyRouter`](crate::SpyRouter).
//! Durations serialize through serde as `{ secs, nanos }`.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use spy_core::SPY_PORT;

/// Location service backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationServiceKind {
    /// Global registry lookup
    #[default]
    Oracle,
    /// Reactive location protocol; recognised but not implemented
    Reactive,
}

impl std::fmt::Display for LocationServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oracle => write!(f, "oracle"),
            Self::Reactive => write!(f, "reactive"),
        }
    }
}

/// Configuration for a SPY router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpyConfig {
    /// Period between HELLO announcements, jittered by half in either direction
    pub hello_interval: Duration,
    pub location_service: LocationServiceKind,
    /// Recorded but not consulted by forwarding
    pub perimeter_mode: bool,
    /// Maximum number of packets waiting for a route
    pub max_queue_len: usize,
    /// Maximum time a packet may wait for a route
    pub max_queue_time: Duration,
    /// Lifetime of neighbor entries and suppression state
    pub entry_lifetime: Duration,
    /// Lifetime of per-source parity observations
    pub parity_lifetime: Duration,
    /// Period of the deferred-queue drain while packets are pending
    pub queue_check_interval: Duration,
    /// Period of the parity check while observations are pending
    pub parity_check_interval: Duration,
    /// Delay before the first parity check after a delivery
    pub parity_initial_delay: Duration,
    pub control_port: u16,
    /// Destination of HELLO broadcasts
    pub broadcast: Ipv4Addr,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            hello_interval: Duration::from_secs(1),
            location_service: LocationServiceKind::Oracle,
            perimeter_mode: false,
            max_queue_len: 64,
            max_queue_time: Duration::from_secs(30),
            entry_lifetime: Duration::from_secs(2),
            parity_lifetime: Duration::from_secs(4),
            queue_check_interval: Duration::from_millis(500),
            parity_check_interval: Duration::from_secs(2),
            parity_initial_delay: Duration::from_secs(1),
            control_port: SPY_PORT,
            broadcast: Ipv4Addr::BROADCAST,
        }
    }
}

impl SpyConfig {
    /// Create a config with more frequent HELLOs for dense or fast-moving networks
    ///
    /// Neighbor state expires after four missed announcements instead of two.
    pub fn fast_hello() -> Self {
        Self {
            hello_interval: Duration::from_millis(250),
            entry_lifetime: Duration::from_secs(1),
            ..Self::default()
        }
    }

    pub fn with_hello_interval(mut self, interval: Duration) -> Self {
        self.hello_interval = interval;
        self
    }

    pub fn with_location_service(mut self, kind: LocationServiceKind) -> Self {
        self.location_service = kind;
        self
    }

    pub fn with_perimeter_mode(mut self, enabled: bool) -> Self {
        self.perimeter_mode = enabled;
        self
    }

    pub fn with_max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    pub fn with_max_queue_time(mut self, time: Duration) -> Self {
        self.max_queue_time = time;
        self
    }

    pub fn with_entry_lifetime(mut self, lifetime: Duration) -> Self {
        self.entry_lifetime = lifetime;
        self
    }

    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    pub fn with_broadcast(mut self, broadcast: Ipv4Addr) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Check the configuration for values that cannot work together
    ///
    /// Returns a list of problems; an empty list means the configuration is
    /// usable.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.hello_interval.is_zero() {
            warnings.push(ConfigWarning::ZeroHelloInterval);
        }

        if self.max_queue_len == 0 {
            warnings.push(ConfigWarning::ZeroQueueLength);
        }

        // neighbors would expire between two announcements
        if self.entry_lifetime < self.hello_interval {
            warnings.push(ConfigWarning::EntryLifetimeShorterThanHello);
        }

        if self.queue_check_interval.is_zero() || self.parity_check_interval.is_zero() {
            warnings.push(ConfigWarning::ZeroCheckInterval);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Configuration problems reported by [`SpyConfig::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    ZeroHelloInterval,
    ZeroQueueLength,
    EntryLifetimeShorterThanHello,
    ZeroCheckInterval,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ZeroHelloInterval => write!(f, "hello_interval is zero"),
            ConfigWarning::ZeroQueueLength => write!(f, "max_queue_len is zero"),
            ConfigWarning::EntryLifetimeShorterThanHello => {
                write!(f, "entry_lifetime is shorter than hello_interval")
            }
            ConfigWarning::ZeroCheckInterval => write!(f, "a periodic check interval is zero"),
        }
    }
}
