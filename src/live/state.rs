//! Connection state, snapshots and transition events

use crate::error::LinkError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Instant;
use tracing::{error, info, warn};

/// Lifecycle state of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying (initial state, or after a terminal failure)
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Session established and subscriptions replayed
    Connected,
    /// Waiting out a backoff delay before the next attempt
    Reconnecting,
    /// Closed by `disconnect()`
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition
    ///
    /// Connected is only reachable from Connecting, so every successful
    /// attempt passes through Connecting first.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Closed)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Disconnected)
                | (Connecting, Closed)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Connected, Closed)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
                | (Reconnecting, Closed)
                | (Closed, Connecting)
        )
    }

    pub fn can_publish(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the connection, published on a watch channel
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub broker: String,
    pub client_id: String,
    pub last_error: Option<LinkError>,
    /// Connection attempts since the last success
    pub attempt: u32,
    /// Successful connections after the first one
    pub reconnects: u32,
    pub connected_since: Option<Instant>,
    pub last_message_at: Option<Instant>,
}

impl ConnectionSnapshot {
    pub fn new(broker: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            broker: broker.into(),
            client_id: client_id.into(),
            last_error: None,
            attempt: 0,
            reconnects: 0,
            connected_since: None,
            last_message_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Emitted on every state transition
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub error: Option<LinkError>,
    pub at: DateTime<Utc>,
}

/// Log a connection state transition at the level it deserves
pub fn log_state_transition(from: ConnectionState, to: ConnectionState, error: Option<&LinkError>) {
    use ConnectionState::*;
    match (from, to, error) {
        (Connecting, Connected, _) => info!(%from, %to, "Broker connection established"),
        (Connected, Reconnecting, Some(e)) => warn!(%from, %to, error = %e, "Broker connection lost"),
        (Connecting, Reconnecting, Some(e)) => {
            warn!(%from, %to, error = %e, "Connection attempt failed")
        }
        (_, Disconnected, Some(e)) => error!(%from, %to, error = %e, "Connection failed permanently"),
        (_, Closed, _) => info!(%from, %to, "Connection closed"),
        _ => info!(%from, %to, "Connection state changed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 5] = [Disconnected, Connecting, Connected, Reconnecting, Closed];

    #[test]
    fn test_connected_only_reachable_from_connecting() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(Connected),
                from == Connecting,
                "{from} -> connected"
            );
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn test_reconnect_cycle_is_legal() {
        let cycle = [
            Disconnected,
            Connecting,
            Connected,
            Reconnecting,
            Connecting,
            Reconnecting,
            Connecting,
            Connected,
            Closed,
            Connecting,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_every_state_can_close_except_closed() {
        for state in ALL {
            assert_eq!(state.can_transition_to(Closed), state != Closed);
        }
    }

    #[test]
    fn test_snapshot_defaults() {
        let snapshot = ConnectionSnapshot::new("mqtt://localhost:1883", "parent-app-1");
        assert_eq!(snapshot.state, Disconnected);
        assert!(!snapshot.is_connected());
        assert!(snapshot.last_error.is_none());
        assert!(Connected.can_publish());
        assert!(!Reconnecting.can_publish());
    }
}
