//! Ledger events and the broadcast bus external dispatchers subscribe to
//!
//! Events are published after a state transition commits, while the writer
//! still holds the ledger lock, so `sequence` order is commit order.
//!
//! Every committed command publishes exactly one event. With the journal
//! enabled the bus resumes after the replayed head, so an event's `sequence`
//! equals the journal sequence of its command and survives restarts. Without a
//! journal the sequence starts at 1 in every process.

use crate::{
    settings::ProtocolSettings,
    types::{Amount, AppId, FeedbackId, Principal},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Notification emitted by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the event stream (starts at 1)
    pub sequence: u64,

    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Commit time of the transition
    pub timestamp: DateTime<Utc>,

    /// What happened
    pub kind: EventKind,
}

impl LedgerEvent {
    /// JSON form for dispatchers that forward events over the wire
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// App the event concerns, if any
    pub fn app_id(&self) -> Option<AppId> {
        match &self.kind {
            EventKind::AppRegistered { app_id, .. }
            | EventKind::AppEscrowUpdated { app_id, .. }
            | EventKind::AppDeactivated { app_id, .. }
            | EventKind::FeedbackSubmitted { app_id, .. } => Some(*app_id),
            EventKind::ProtocolSettingsUpdated { .. }
            | EventKind::OwnerRewardsClaimed { .. }
            | EventKind::ProtocolFeesWithdrawn { .. } => None,
        }
    }
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// New app registered
    AppRegistered {
        /// App ID
        app_id: AppId,
        /// Owner
        owner: Principal,
        /// Display name
        name: String,
        /// Home page URL
        home_url: String,
        /// Mini-app URL
        miniapp_url: String,
        /// Registration payment
        payment: Amount,
    },

    /// Escrow topped up or withdrawn
    AppEscrowUpdated {
        /// App ID
        app_id: AppId,
        /// Escrow after the change
        escrow_amount: Amount,
    },

    /// App deactivated by its owner
    AppDeactivated {
        /// App ID
        app_id: AppId,
        /// Owner who deactivated it
        owner: Principal,
    },

    /// Feedback accepted and paid
    FeedbackSubmitted {
        /// Feedback ID
        feedback_id: FeedbackId,
        /// App ID
        app_id: AppId,
        /// Reviewer
        reviewer: Principal,
        /// Rating
        rating: u8,
    },

    /// Governance replaced the protocol settings
    ProtocolSettingsUpdated {
        /// New settings version
        version: u64,
        /// New settings
        settings: ProtocolSettings,
    },

    /// Owner claimed accrued owner shares
    OwnerRewardsClaimed {
        /// Owner
        owner: Principal,
        /// Amount paid out
        amount: Amount,
    },

    /// Treasury paid out
    ProtocolFeesWithdrawn {
        /// Beneficiary
        recipient: Principal,
        /// Amount paid out
        amount: Amount,
    },
}

/// Broadcast bus for ledger events
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
    next_sequence: AtomicU64,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Continue numbering after `sequence` (the replayed journal head)
    pub fn resume_after(&self, sequence: u64) {
        self.next_sequence.store(sequence + 1, Ordering::SeqCst);
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event; having no subscribers is fine
    pub fn publish(&self, kind: EventKind, timestamp: DateTime<Utc>) -> LedgerEvent {
        let event = LedgerEvent {
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            event_id: Uuid::now_v7(),
            timestamp,
            kind,
        };

        tracing::debug!(
            sequence = event.sequence,
            subscribers = self.sender.receiver_count(),
            "Publishing ledger event"
        );
        let _ = self.sender.send(event.clone());

        event
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(
            EventKind::AppEscrowUpdated {
                app_id: AppId::new(1),
                escrow_amount: Amount::from_units(5),
            },
            Utc::now(),
        );
        bus.publish(
            EventKind::AppDeactivated {
                app_id: AppId::new(1),
                owner: Principal::new("0xowner"),
            },
            Utc::now(),
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(matches!(second.kind, EventKind::AppDeactivated { .. }));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let event = bus.publish(
            EventKind::OwnerRewardsClaimed {
                owner: Principal::new("0xowner"),
                amount: Amount::from_units(1),
            },
            Utc::now(),
        );
        assert_eq!(event.sequence, 1);
        assert_eq!(event.app_id(), None);
    }

    #[test]
    fn test_resume_after_journal_head() {
        let bus = EventBus::default();
        bus.resume_after(41);
        let event = bus.publish(
            EventKind::OwnerRewardsClaimed {
                owner: Principal::new("0xowner"),
                amount: Amount::from_units(1),
            },
            Utc::now(),
        );
        assert_eq!(event.sequence, 42);
    }

    #[test]
    fn test_json_is_tagged() {
        let bus = EventBus::default();
        let event = bus.publish(
            EventKind::FeedbackSubmitted {
                feedback_id: FeedbackId::new(1),
                app_id: AppId::new(3),
                reviewer: Principal::new("0xreviewer"),
                rating: 5,
            },
            Utc::now(),
        );
        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"FeedbackSubmitted\""));
        assert!(json.contains("\"rating\":5"));
    }
}
