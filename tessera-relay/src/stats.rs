//! Relay counters.
//!
//! Updated with relaxed atomics on the hot path; read via [`RelayStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub messages_received: u64,
    pub malformed_frames: u64,
    pub unrouted_messages: u64,
    pub deliveries_attempted: u64,
    pub deliveries_failed: u64,
}

#[derive(Debug, Default)]
pub struct RelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    messages_received: AtomicU64,
    malformed_frames: AtomicU64,
    unrouted_messages: AtomicU64,
    deliveries_attempted: AtomicU64,
    deliveries_failed: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturating: never wrap below zero.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_unrouted(&self) {
        self.unrouted_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deliveries(&self, attempted: usize, failed: usize) {
        self.deliveries_attempted.fetch_add(attempted as u64, Ordering::Relaxed);
        self.deliveries_failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unrouted_messages: self.unrouted_messages.load(Ordering::Relaxed),
            deliveries_attempted: self.deliveries_attempted.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}
