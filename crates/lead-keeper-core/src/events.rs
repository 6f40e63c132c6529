//! # Domain Events
//!
//! Facts published after a successful persistence operation, and the
//! in-process dispatcher that fans them out to subscribers (audit trail,
//! notifications).
//!
//! Subscribers are registered explicitly at wiring time and run in
//! registration order. A failing subscriber is logged and skipped; it never
//! fails the operation that published the event.

use crate::audit::Subject;
use crate::authz::Actor;
use crate::contact::ContactField;
use crate::deal::{Amount, DealStage};
use crate::storage::StorageError;
use crate::{ContactId, DomainEventId, ReceiptId, Timestamp, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    DealCreated {
        title: String,
        amount: Amount,
        currency: String,
        stage: DealStage,
        contact_id: ContactId,
    },
    DealStageChanged {
        from: DealStage,
        to: DealStage,
        probability: Option<u8>,
    },
    DealWon {
        won_amount: Amount,
        currency: String,
    },
    DealLost {
        reason: String,
    },
    DealAssigned {
        from: UserId,
        to: UserId,
    },
    DealDeleted,
    DealRestored,
    ContactCreated {
        receipt_id: Option<ReceiptId>,
    },
    ContactUpdated {
        changed_fields: BTreeSet<ContactField>,
        receipt_id: Option<ReceiptId>,
    },
    ContactDeleted,
    ContactRestored,
    TaskCreated {
        contact_id: ContactId,
        title: String,
    },
    TaskCompleted {
        contact_id: ContactId,
        title: String,
    },
    DataExported {
        resource: String,
        format: String,
        record_count: usize,
    },
}

impl EventPayload {
    /// Dotted event label used for routing and audit actions
    pub fn name(&self) -> &'static str {
        match self {
            Self::DealCreated { .. } => "deal.created",
            Self::DealStageChanged { .. } => "deal.stage_changed",
            Self::DealWon { .. } => "deal.won",
            Self::DealLost { .. } => "deal.lost",
            Self::DealAssigned { .. } => "deal.assigned",
            Self::DealDeleted => "deal.deleted",
            Self::DealRestored => "deal.restored",
            Self::ContactCreated { .. } => "contact.created",
            Self::ContactUpdated { .. } => "contact.updated",
            Self::ContactDeleted => "contact.deleted",
            Self::ContactRestored => "contact.restored",
            Self::TaskCreated { .. } => "task.created",
            Self::TaskCompleted { .. } => "task.completed",
            Self::DataExported { .. } => "data.exported",
        }
    }

    /// Receipt that caused the event, for pipeline-originated events
    pub fn receipt_id(&self) -> Option<ReceiptId> {
        match self {
            Self::ContactCreated { receipt_id } | Self::ContactUpdated { receipt_id, .. } => {
                *receipt_id
            }
            _ => None,
        }
    }

    /// Payload fields as a JSON object, without the event tag
    pub fn properties(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("event");
                map
            }
            _ => serde_json::Map::new(),
        }
    }
}

/// Envelope shared by every published event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: DomainEventId,
    pub occurred_at: Timestamp,
    /// `None` when the system acted on its own
    pub actor: Option<UserId>,
    pub subject: Subject,
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Create an event attributed to the actor
    pub fn new(actor: &Actor, subject: Subject, payload: EventPayload, occurred_at: Timestamp) -> Self {
        Self {
            id: DomainEventId::new(),
            occurred_at,
            actor: actor.user_id,
            subject,
            payload,
        }
    }

    /// Dotted event label
    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

/// Failure reported by a subscriber
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Delivery failed: {message}")]
    Delivery { message: String },
}

/// Receives published domain events
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Handle one event
    async fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError>;
}

/// Explicit in-process publisher
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, builder style
    pub fn with_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribe(subscriber);
        self
    }

    /// Register a subscriber
    pub fn subscribe(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver the event to every subscriber in registration order
    ///
    /// Returns how many subscribers handled the event successfully.
    pub async fn publish(&self, event: &DomainEvent) -> usize {
        let mut delivered = 0;
        for subscriber in &self.subscribers {
            match subscriber.handle(event).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(
                        event_id = %event.id,
                        event = event.name(),
                        subscriber = subscriber.name(),
                        "Event delivered"
                    );
                }
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        event = event.name(),
                        subscriber = subscriber.name(),
                        error = %e,
                        "Event subscriber failed"
                    );
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.subscribers.iter().map(|s| s.name()).collect();
        f.debug_struct("EventDispatcher")
            .field("subscribers", &names)
            .finish()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
