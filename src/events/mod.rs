//! Event broadcasting for billing notifications.
//!
//! Services publish events to the bus; any number of subscribers (balance
//! caches, notifiers, audit tails) receive them.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Ledger, Pricing │────>│    EventBus     │────>│   Subscribers   │
//! └─────────────────┘     │  (broadcast)    │     └─────────────────┘
//!                         └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut rx = event_bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     if let ServerEvent::BalanceChanged { user_id, new_balance, .. } = event {
//!         // refresh UI, caches, ...
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default capacity for the broadcast channel.
/// Slow subscribers that fall further behind miss the oldest events.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event topics that subscribers can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    /// Balance movements
    Ledger,
    /// Failed and anomalous charges
    Billing,
    /// Catalog changes
    Pricing,
    /// All events
    All,
}

impl EventTopic {
    /// Check if this topic matches another topic.
    /// `All` matches everything.
    pub fn matches(&self, other: &EventTopic) -> bool {
        matches!(self, EventTopic::All) || matches!(other, EventTopic::All) || self == other
    }
}

/// Billing events published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A user's balance moved (debit or top-up)
    BalanceChanged {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
        /// Signed change in points
        delta: i64,
        new_balance: i64,
        /// Billing event behind the change, absent for top-ups
        billing_event_id: Option<Uuid>,
    },

    /// A charge attempt failed and nothing was deducted
    ChargeFailed {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
        billing_event_id: Option<Uuid>,
        model: String,
        reason: String,
    },

    /// A charge exceeded the anomaly threshold (it was still charged)
    ChargeAnomaly {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
        model: String,
        points: i64,
        threshold_points: i64,
        total_cost: Decimal,
    },

    /// A model priced from the fallback table got its own catalog record
    PriceRecordAutoCreated {
        record_id: Uuid,
        timestamp: DateTime<Utc>,
        model: String,
        input_unit_price: Decimal,
        output_unit_price: Decimal,
    },
}

impl ServerEvent {
    /// Get the topic this event belongs to.
    pub fn topic(&self) -> EventTopic {
        match self {
            ServerEvent::BalanceChanged { .. } => EventTopic::Ledger,
            ServerEvent::ChargeFailed { .. } => EventTopic::Billing,
            ServerEvent::ChargeAnomaly { .. } => EventTopic::Billing,
            ServerEvent::PriceRecordAutoCreated { .. } => EventTopic::Pricing,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::BalanceChanged { .. } => "balance_changed",
            ServerEvent::ChargeFailed { .. } => "charge_failed",
            ServerEvent::ChargeAnomaly { .. } => "charge_anomaly",
            ServerEvent::PriceRecordAutoCreated { .. } => "price_record_auto_created",
        }
    }
}

/// Event bus for broadcasting billing events.
///
/// Publishing never blocks; with no subscribers the event is dropped and
/// counted.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
    events_published: AtomicU64,
    events_dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: ServerEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                // No active subscribers, event is dropped
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance_changed(user_id: Uuid) -> ServerEvent {
        ServerEvent::BalanceChanged {
            user_id,
            timestamp: Utc::now(),
            delta: -120,
            new_balance: 880,
            billing_event_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_event_topic_matches() {
        assert!(EventTopic::All.matches(&EventTopic::Ledger));
        assert!(EventTopic::Billing.matches(&EventTopic::All));
        assert!(EventTopic::Pricing.matches(&EventTopic::Pricing));
        assert!(!EventTopic::Ledger.matches(&EventTopic::Billing));
    }

    #[test]
    fn test_server_event_topic_and_type() {
        let event = balance_changed(Uuid::new_v4());
        assert_eq!(event.topic(), EventTopic::Ledger);
        assert_eq!(event.event_type(), "balance_changed");

        let anomaly = ServerEvent::ChargeAnomaly {
            user_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            model: "gpt-4".into(),
            points: 50_000,
            threshold_points: 10_000,
            total_cost: Decimal::from(50),
        };
        assert_eq!(anomaly.topic(), EventTopic::Billing);
        assert_eq!(anomaly.event_type(), "charge_anomaly");
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(balance_changed(Uuid::new_v4())).unwrap();
        assert_eq!(json["event_type"], "balance_changed");
        assert_eq!(json["delta"], -120);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(balance_changed(Uuid::new_v4())), 0);
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.events_dropped(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let user_id = Uuid::new_v4();
        assert_eq!(bus.publish(balance_changed(user_id)), 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                ServerEvent::BalanceChanged { user_id: got, .. } => assert_eq!(got, user_id),
                other => panic!("Unexpected event: {:?}", other),
            }
        }
    }
}
