//! Thread-safe communicator counters
//!
//! Atomic counters updated from both the consumer threads and the network
//! thread, with a serializable snapshot for reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-communicator counters
#[derive(Debug, Default)]
pub struct CommunicatorStats {
    connected: AtomicBool,
    connect_requests: AtomicU64,
    reconnect_requests: AtomicU64,
    connections_established: AtomicU64,
    connections_refused: AtomicU64,
    disconnects: AtomicU64,
    unexpected_disconnects: AtomicU64,
    connection_start_time: AtomicU64,

    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    messages_delivered: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl CommunicatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    // Connection handshake
    pub fn connect_requested(&self) {
        self.connect_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects_requested(&self, count: u32) {
        self.reconnect_requests
            .fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self, unexpected: bool) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        if unexpected {
            self.unexpected_disconnects.fetch_add(1, Ordering::Relaxed);
        }
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    // Message flow
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_duration(&self, now: u64) -> u64 {
        if !self.connected.load(Ordering::Relaxed) {
            return 0;
        }
        match self.connection_start_time.load(Ordering::Relaxed) {
            0 => 0,
            start => now.saturating_sub(start),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let now = current_timestamp();
        StatsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            connect_requests: self.connect_requests.load(Ordering::Relaxed),
            reconnect_requests: self.reconnect_requests.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            unexpected_disconnects: self.unexpected_disconnects.load(Ordering::Relaxed),
            connection_duration_seconds: self.connection_duration(now),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connected: bool,
    pub connect_requests: u64,
    pub reconnect_requests: u64,
    pub connections_established: u64,
    pub connections_refused: u64,
    pub disconnects: u64,
    pub unexpected_disconnects: u64,
    pub connection_duration_seconds: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub messages_delivered: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
