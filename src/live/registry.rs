//! Desired-subscription set, replayed in registration order after every connect

use crate::protocol::Qos;
use chrono::{DateTime, Utc};

/// A subscription the application wants to hold
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub filter: String,
    pub qos: Qos,
    pub registered_at: DateTime<Utc>,
}

/// What `upsert` changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    QosChanged { previous: Qos },
    Unchanged,
}

impl Upsert {
    /// Whether the broker needs to hear about this change
    pub fn needs_send(self) -> bool {
        !matches!(self, Upsert::Unchanged)
    }
}

/// Ordered, duplicate-free subscription set
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter, or update its QoS in place if already present
    pub fn upsert(&mut self, filter: &str, qos: Qos) -> Upsert {
        match self.entries.iter_mut().find(|entry| entry.filter == filter) {
            Some(entry) if entry.qos == qos => Upsert::Unchanged,
            Some(entry) => {
                let previous = entry.qos;
                entry.qos = qos;
                Upsert::QosChanged { previous }
            }
            None => {
                self.entries.push(Subscription {
                    filter: filter.to_string(),
                    qos,
                    registered_at: Utc::now(),
                });
                Upsert::Added
            }
        }
    }

    /// Remove a filter, returning whether it was registered
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.filter != filter);
        self.entries.len() != before
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entries.iter().any(|entry| entry.filter == filter)
    }

    /// Subscriptions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
