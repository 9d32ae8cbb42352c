//! Per-client metrics collection
//!
//! Every [`crate::LiveClient`] owns one [`LiveMetrics`] behind an `Arc`;
//! the supervisor task writes, any handle reads. Counters are relaxed
//! atomics, a snapshot is not a consistent cut across counters.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Thread-safe metrics collector using atomics
#[derive(Debug)]
pub struct LiveMetrics {
    // Connection
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    auth_failures: AtomicU64,
    connections_lost: AtomicU64,
    reconnects: AtomicU64,
    connection_start_time: AtomicU64,

    // Outbound
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_queued: AtomicU64,
    messages_dropped: AtomicU64,
    queue_depth: AtomicU64,

    // Inbound
    messages_received: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_unmatched: AtomicU64,
    handler_failures: AtomicU64,
    protocol_errors: AtomicU64,

    // Subscriptions
    subscriptions_replayed: AtomicU64,

    created_at: AtomicU64,
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            messages_unmatched: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            subscriptions_replayed: AtomicU64::new(0),
            created_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// `reconnect` is true for every successful connect after the first
    pub fn connection_established(&self, reconnect: bool) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if reconnect {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connection_closed();
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
        self.connection_failed();
    }

    /// An established session dropped without being asked to
    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connection_closed();
    }

    pub fn connection_closed(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    // Outbound metrics
    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued message was evicted to make room
    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    // Inbound metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one dispatch
    pub fn message_dispatched(&self, delivered: usize, failed: usize) {
        if delivered == 0 && failed == 0 {
            self.messages_unmatched.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        self.handler_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriptions_replayed(&self, count: usize) {
        self.subscriptions_replayed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let connected = self.connected.load(Ordering::Relaxed);
        let started = self.connection_start_time.load(Ordering::Relaxed);

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected,
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                auth_failures: self.auth_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                reconnects: self.reconnects.load(Ordering::Relaxed),
                connection_duration_seconds: if connected && started > 0 {
                    now.saturating_sub(started)
                } else {
                    0
                },
            },
            outbound: OutboundMetrics {
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_queued: self.messages_queued.load(Ordering::Relaxed),
                messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
                queue_depth: self.queue_depth.load(Ordering::Relaxed),
            },
            inbound: InboundMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
                messages_unmatched: self.messages_unmatched.load(Ordering::Relaxed),
                handler_failures: self.handler_failures.load(Ordering::Relaxed),
                protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            },
            subscriptions_replayed: self.subscriptions_replayed.load(Ordering::Relaxed),
            uptime_seconds: now.saturating_sub(self.created_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub outbound: OutboundMetrics,
    pub inbound: InboundMetrics,
    pub subscriptions_replayed: u64,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub auth_failures: u64,
    /// Established sessions that dropped
    pub connections_lost: u64,
    pub reconnects: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundMetrics {
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_queued: u64,
    /// Evicted from a full publish queue
    pub messages_dropped: u64,
    pub queue_depth: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InboundMetrics {
    pub messages_received: u64,
    /// Messages that matched at least one handler
    pub messages_dispatched: u64,
    pub messages_unmatched: u64,
    pub handler_failures: u64,
    pub protocol_errors: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let metrics = LiveMetrics::new();

        metrics.connection_attempt();
        metrics.connection_failed();
        metrics.connection_attempt();
        metrics.connection_established(false);
        metrics.connection_lost();
        metrics.connection_attempt();
        metrics.connection_established(true);

        let snapshot = metrics.snapshot().connection;
        assert!(snapshot.connected);
        assert_eq!(snapshot.connection_attempts, 3);
        assert_eq!(snapshot.connections_established, 2);
        assert_eq!(snapshot.connection_failures, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.auth_failures, 0);
        assert_eq!(snapshot.connections_lost, 1);
    }

    #[test]
    fn test_close_is_not_a_lost_connection() {
        let metrics = LiveMetrics::new();
        metrics.connection_established(false);
        metrics.connection_closed();

        let snapshot = metrics.snapshot().connection;
        assert!(!snapshot.connected);
        assert_eq!(snapshot.connections_lost, 0);
        assert_eq!(snapshot.connection_duration_seconds, 0);
    }

    #[test]
    fn test_auth_failure_counts_as_connection_failure() {
        let metrics = LiveMetrics::new();
        metrics.auth_failed();

        let snapshot = metrics.snapshot().connection;
        assert_eq!(snapshot.auth_failures, 1);
        assert_eq!(snapshot.connection_failures, 1);
        assert!(!snapshot.connected);
    }

    #[test]
    fn test_dispatch_outcomes() {
        let metrics = LiveMetrics::new();
        metrics.message_dispatched(0, 0);
        metrics.message_dispatched(2, 1);
        metrics.message_dispatched(0, 1);

        let inbound = metrics.snapshot().inbound;
        assert_eq!(inbound.messages_unmatched, 1);
        assert_eq!(inbound.messages_dispatched, 2);
        assert_eq!(inbound.handler_failures, 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = LiveMetrics::new();
        metrics.message_queued();
        metrics.message_dropped();
        metrics.set_queue_depth(7);

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["outbound"]["messages_dropped"], 1);
        assert_eq!(json["outbound"]["queue_depth"], 7);
        assert_eq!(json["connection"]["connected"], false);
        assert_eq!(metrics.dropped_count(), 1);
    }
}
