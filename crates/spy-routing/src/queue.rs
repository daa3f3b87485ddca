//! Deferred packet queue
//!
//! Packets whose destination cannot be routed yet wait here until the
//! periodic drain resolves them. The queue is bounded by length and by
//! per-packet age. Destinations are tracked separately from the packets so
//! a destination stays pending even when its packets were refused for lack
//! of room.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use spy_core::DataPacket;

/// A packet waiting for its destination to become routable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub packet: DataPacket,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn destination(&self) -> Ipv4Addr {
        self.packet.destination
    }

    fn is_expired(&self, max_time: Duration, now: Instant) -> bool {
        self.enqueued_at + max_time <= now
    }
}

/// FIFO of deferred packets with a global length and age bound
#[derive(Debug, Clone)]
pub struct RequestQueue {
    entries: VecDeque<QueueEntry>,
    /// Destinations awaiting a drain attempt, most recent first
    pending: Vec<Ipv4Addr>,
    max_len: usize,
    max_time: Duration,
}

impl RequestQueue {
    pub fn new(max_len: usize, max_time: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            pending: Vec::new(),
            max_len,
            max_time,
        }
    }

    /// Queue a packet
    ///
    /// Returns `false` when the queue is full; the packet is not stored but
    /// its destination is still tracked as pending.
    pub fn enqueue(&mut self, packet: DataPacket, now: Instant) -> bool {
        let destination = packet.destination;
        if !self.pending.contains(&destination) {
            self.pending.insert(0, destination);
        }

        if self.entries.len() >= self.max_len {
            debug!(dst = %destination, len = self.entries.len(), "deferred queue full");
            return false;
        }

        trace!(dst = %destination, "packet deferred");
        self.entries.push_back(QueueEntry {
            packet,
            enqueued_at: now,
        });
        true
    }

    /// Pop the oldest unexpired packet for `destination`
    pub fn dequeue(&mut self, destination: Ipv4Addr, now: Instant) -> Option<QueueEntry> {
        let max_time = self.max_time;
        let index = self
            .entries
            .iter()
            .position(|entry| entry.destination() == destination && !entry.is_expired(max_time, now))?;
        self.entries.remove(index)
    }

    /// Remove and return every packet older than the age bound
    pub fn purge(&mut self, now: Instant) -> Vec<QueueEntry> {
        let max_time = self.max_time;
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.is_expired(max_time, now));
        self.entries = kept.into();

        // a destination with nothing left to send no longer needs draining
        let entries = &self.entries;
        self.pending
            .retain(|dst| entries.iter().any(|entry| entry.destination() == *dst));

        if !expired.is_empty() {
            debug!(expired = expired.len(), "deferred packets expired");
        }
        expired
    }

    /// Remove and return every packet for `destination`
    pub fn drop_with_destination(&mut self, destination: Ipv4Addr) -> Vec<QueueEntry> {
        let (dropped, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.destination() == destination);
        self.entries = kept.into();
        dropped
    }

    /// Destinations awaiting a drain attempt
    pub fn pending_destinations(&self) -> Vec<Ipv4Addr> {
        self.pending.clone()
    }

    pub fn remove_pending(&mut self, destination: Ipv4Addr) {
        self.pending.retain(|dst| *dst != destination);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Forget all packets and pending destinations
    pub fn clear(&mut self) -> Vec<QueueEntry> {
        self.pending.clear();
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn packet(dst: u8, payload: &'static [u8]) -> DataPacket {
        DataPacket::new(addr(1), addr(dst), payload)
    }

    #[test]
    fn test_fifo_per_destination() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::from_secs(30));
        assert!(queue.enqueue(packet(5, b"a"), now));
        assert!(queue.enqueue(packet(6, b"x"), now));
        assert!(queue.enqueue(packet(5, b"b"), now));

        let first = queue.dequeue(addr(5), now).unwrap();
        assert_eq!(&first.packet.payload[..], b"a");
        let second = queue.dequeue(addr(5), now).unwrap();
        assert_eq!(&second.packet.payload[..], b"b");
        assert!(queue.dequeue(addr(5), now).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_full_queue_still_tracks_destination() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(1, Duration::from_secs(30));
        assert!(queue.enqueue(packet(5, b"a"), now));
        assert!(!queue.enqueue(packet(7, b"b"), now));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_destinations(), vec![addr(7), addr(5)]);
    }

    #[test]
    fn test_pending_destinations_unique() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::from_secs(30));
        queue.enqueue(packet(5, b"a"), now);
        queue.enqueue(packet(5, b"b"), now);
        assert_eq!(queue.pending_destinations(), vec![addr(5)]);

        queue.remove_pending(addr(5));
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_expiry() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::from_secs(30));
        queue.enqueue(packet(5, b"old"), now);
        queue.enqueue(packet(6, b"new"), now + Duration::from_secs(20));

        let later = now + Duration::from_secs(31);
        assert!(queue.dequeue(addr(5), later).is_none());

        let expired = queue.purge(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].destination(), addr(5));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_destinations(), vec![addr(6)]);
    }

    #[test]
    fn test_drop_with_destination() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::from_secs(30));
        queue.enqueue(packet(5, b"a"), now);
        queue.enqueue(packet(6, b"b"), now);
        queue.enqueue(packet(5, b"c"), now);

        let dropped = queue.drop_with_destination(addr(5));
        assert_eq!(dropped.len(), 2);
        assert_eq!(queue.len(), 1);

        let cleared = queue.clear();
        assert_eq!(cleared.len(), 1);
        assert!(queue.is_empty());
        assert!(!queue.has_pending());
    }
}
