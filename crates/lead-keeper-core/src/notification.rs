//! # Notification Routing
//!
//! Maps published events to recipients according to routes loaded from
//! configuration, and hands each resulting notification to a [`Notifier`].
//! Delivery channels (email, chat) are outside this crate; the bundled
//! [`OutboxNotifier`] keeps notifications in memory for inspection.

use crate::audit::Subject;
use crate::authz::Role;
use crate::events::{DomainEvent, EventSubscriber, SubscriberError};
use crate::{DomainEventId, Timestamp, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Notifications retained by [`OutboxNotifier`]
pub const OUTBOX_CAPACITY: usize = 1000;

/// One routing rule
///
/// `event` is an exact event name (`deal.won`), a family (`deal.*`), or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRoute {
    pub event: String,
    pub channel: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub users: Vec<UserId>,
}

impl NotificationRoute {
    /// Whether this route applies to the event name
    pub fn matches(&self, event_name: &str) -> bool {
        match self.event.as_str() {
            "*" => true,
            pattern => match pattern.strip_suffix(".*") {
                Some(family) => event_name
                    .split_once('.')
                    .map_or(false, |(prefix, _)| prefix == family),
                None => pattern == event_name,
            },
        }
    }
}

/// Routing table loaded once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRouting {
    #[serde(default)]
    pub routes: Vec<NotificationRoute>,
}

impl NotificationRouting {
    pub fn new(routes: Vec<NotificationRoute>) -> Self {
        Self { routes }
    }

    /// Routes that apply to the event name
    pub fn routes_for<'a>(&'a self, event_name: &'a str) -> impl Iterator<Item = &'a NotificationRoute> {
        self.routes.iter().filter(move |r| r.matches(event_name))
    }
}

/// Who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    Role(Role),
    User(UserId),
}

/// A message for one recipient on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: DomainEventId,
    pub event: String,
    pub channel: String,
    pub recipient: Recipient,
    pub subject: Subject,
    pub message: String,
    pub created_at: Timestamp,
}

/// Delivery port for notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), SubscriberError>;
}

/// In-memory notifier that keeps the most recent notifications
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    outbox: Mutex<VecDeque<Notification>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retained notifications, oldest first
    pub async fn notifications(&self) -> Vec<Notification> {
        self.outbox.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), SubscriberError> {
        info!(
            event = %notification.event,
            channel = %notification.channel,
            recipient = ?notification.recipient,
            subject = %notification.subject,
            "Notification queued"
        );
        let mut outbox = self.outbox.lock().await;
        if outbox.len() >= OUTBOX_CAPACITY {
            outbox.pop_front();
        }
        outbox.push_back(notification);
        Ok(())
    }
}

/// Turns published events into notifications
pub struct NotificationSubscriber {
    routing: NotificationRouting,
    notifier: Arc<dyn Notifier>,
}

impl NotificationSubscriber {
    pub fn new(routing: NotificationRouting, notifier: Arc<dyn Notifier>) -> Self {
        Self { routing, notifier }
    }

    /// Notifications the event produces, one per recipient of each matching route
    pub fn notifications_for(&self, event: &DomainEvent) -> Vec<Notification> {
        let name = event.name();
        let message = format!("{} on {}", name, event.subject);

        self.routing
            .routes_for(name)
            .flat_map(|route| {
                let recipients = route
                    .roles
                    .iter()
                    .copied()
                    .map(Recipient::Role)
                    .chain(route.users.iter().copied().map(Recipient::User));
                recipients.map(move |recipient| (route, recipient))
            })
            .map(|(route, recipient)| Notification {
                event_id: event.id,
                event: name.to_string(),
                channel: route.channel.clone(),
                recipient,
                subject: event.subject.clone(),
                message: message.clone(),
                created_at: event.occurred_at,
            })
            .collect()
    }
}

#[async_trait]
impl EventSubscriber for NotificationSubscriber {
    fn name(&self) -> &str {
        "notifications"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        for notification in self.notifications_for(event) {
            self.notifier.notify(notification).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "notification_tests.rs"]
mod tests;
