//! Connection health derived from a connection snapshot

use super::state::ConnectionSnapshot;
use std::time::{Duration, Instant};

/// Health metrics for connection monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    /// Time since the current session was established
    pub uptime: Option<Duration>,
    /// Time since the last inbound message
    pub time_since_last_message: Option<Duration>,
    /// Successful reconnections after the first connect
    pub reconnect_count: u32,
    /// Connected right now
    pub is_healthy: bool,
}

/// Connection quality assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    /// Stable for over an hour, never reconnected
    Excellent,
    Good,
    Fair,
    /// Frequent reconnections
    Poor,
    /// Not connected, or reconnecting constantly
    Critical,
}

/// Pure health calculations
pub struct HealthMonitor;

impl HealthMonitor {
    /// Derive health metrics from a snapshot, relative to `now`
    ///
    /// Live-update topics can be silent for hours, so message recency is
    /// reported but does not affect `is_healthy`.
    pub fn calculate_health_metrics(snapshot: &ConnectionSnapshot, now: Instant) -> HealthMetrics {
        let uptime = snapshot
            .connected_since
            .filter(|_| snapshot.is_connected())
            .map(|t| now.saturating_duration_since(t));
        let time_since_last_message = snapshot
            .last_message_at
            .map(|t| now.saturating_duration_since(t));

        HealthMetrics {
            uptime,
            time_since_last_message,
            reconnect_count: snapshot.reconnects,
            is_healthy: uptime.is_some(),
        }
    }

    pub fn assess_connection_quality(metrics: &HealthMetrics) -> ConnectionQuality {
        if !metrics.is_healthy {
            return ConnectionQuality::Critical;
        }

        match (metrics.reconnect_count, metrics.uptime) {
            (0, Some(uptime)) if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
            (0, Some(_)) => ConnectionQuality::Good,
            (1..=2, Some(uptime)) if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
            (1..=2, Some(_)) => ConnectionQuality::Fair,
            (3..=5, _) => ConnectionQuality::Fair,
            (6..=10, _) => ConnectionQuality::Poor,
            _ => ConnectionQuality::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::state::ConnectionState;

    // Shifted forward so subtracting hours never underflows on a freshly booted host
    fn later() -> Instant {
        Instant::now() + Duration::from_secs(86_400)
    }

    fn connected_snapshot(uptime_secs: u64, reconnects: u32, now: Instant) -> ConnectionSnapshot {
        let mut snapshot = ConnectionSnapshot::new("mqtt://localhost:1883", "parent-app-1");
        snapshot.state = ConnectionState::Connected;
        snapshot.connected_since = Some(now - Duration::from_secs(uptime_secs));
        snapshot.reconnects = reconnects;
        snapshot
    }

    #[test]
    fn test_calculate_health_metrics() {
        let now = later();
        let mut snapshot = connected_snapshot(3600, 2, now);
        snapshot.last_message_at = Some(now - Duration::from_secs(60));

        let metrics = HealthMonitor::calculate_health_metrics(&snapshot, now);

        assert_eq!(metrics.uptime, Some(Duration::from_secs(3600)));
        assert_eq!(metrics.time_since_last_message, Some(Duration::from_secs(60)));
        assert_eq!(metrics.reconnect_count, 2);
        assert!(metrics.is_healthy);
    }

    #[test]
    fn test_silence_is_not_unhealthy() {
        let now = later();
        let mut snapshot = connected_snapshot(7200, 0, now);
        snapshot.last_message_at = Some(now - Duration::from_secs(7000));

        assert!(HealthMonitor::calculate_health_metrics(&snapshot, now).is_healthy);
    }

    #[test]
    fn test_stale_connected_since_ignored_when_down() {
        let now = later();
        let mut snapshot = connected_snapshot(600, 1, now);
        snapshot.state = ConnectionState::Reconnecting;

        let metrics = HealthMonitor::calculate_health_metrics(&snapshot, now);
        assert_eq!(metrics.uptime, None);
        assert!(!metrics.is_healthy);
        assert_eq!(
            HealthMonitor::assess_connection_quality(&metrics),
            ConnectionQuality::Critical
        );
    }

    #[test]
    fn test_assess_connection_quality() {
        let now = later();
        let grade = |uptime_secs, reconnects| {
            let snapshot = connected_snapshot(uptime_secs, reconnects, now);
            HealthMonitor::assess_connection_quality(&HealthMonitor::calculate_health_metrics(
                &snapshot, now,
            ))
        };

        assert_eq!(grade(7200, 0), ConnectionQuality::Excellent);
        assert_eq!(grade(1800, 0), ConnectionQuality::Good);
        assert_eq!(grade(3600, 2), ConnectionQuality::Good);
        assert_eq!(grade(1800, 2), ConnectionQuality::Fair);
        assert_eq!(grade(60, 4), ConnectionQuality::Fair);
        assert_eq!(grade(60, 8), ConnectionQuality::Poor);
        assert_eq!(grade(60, 11), ConnectionQuality::Critical);
    }
}
