//! Service abstractions consumed by the routing engine
//!
//! ## Key Traits
//!
//! - [`Clock`]: Time abstraction for testability
//! - [`LocationService`]: Destination position lookup
//! - [`Mobility`]: The local node's own position

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::geometry::Position;

/// Time abstraction for testability
///
/// This trait allows tests and the simulator to control time, enabling
/// deterministic testing of timer and expiry behavior.
pub trait Clock: Send + Sync {
    /// Get the current instant (monotonic time)
    fn now(&self) -> Instant;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same time, so a test can hand one clone to a router
/// and advance another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Move time forward to `instant`; earlier instants are ignored
    pub fn advance_to(&self, instant: Instant) {
        if let Some(delta) = instant.checked_duration_since(self.now()) {
            self.advance(delta);
        }
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

/// Maps a destination address to an estimated position
pub trait LocationService: Send + Sync {
    /// Current position estimate for `addr`, if any
    fn position(&self, addr: Ipv4Addr) -> Option<Position>;

    /// Whole-second stamp of the estimate for `addr`; 0 when unknown
    fn entry_update_time(&self, addr: Ipv4Addr) -> u32;

    /// Whether a lookup for `addr` is still in progress
    fn is_in_search(&self, addr: Ipv4Addr) -> bool;

    /// Whether any estimate for `addr` is held
    fn has_position(&self, addr: Ipv4Addr) -> bool;

    /// Forget all locally held estimates
    fn clear(&self);
}

/// Reports the local node's own position
pub trait Mobility: Send + Sync {
    fn position(&self) -> Position;
}

/// A node that never moves
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticMobility {
    position: Position,
}

impl StaticMobility {
    pub fn new(position: Position) -> Self {
        Self { position }
    }
}

impl Mobility for StaticMobility {
    fn position(&self) -> Position {
        self.position
    }
}

impl<T: Mobility + ?Sized> Mobility for Arc<T> {
    fn position(&self) -> Position {
        (**self).position()
    }
}
