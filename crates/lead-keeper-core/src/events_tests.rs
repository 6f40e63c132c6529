use super::*;
use crate::authz::Role;
use crate::DealId;
use std::sync::Mutex;

struct RecordingSubscriber {
    label: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        self.label
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.label, event.name()));
        Ok(())
    }
}

struct FailingSubscriber;

#[async_trait]
impl EventSubscriber for FailingSubscriber {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &DomainEvent) -> Result<(), SubscriberError> {
        Err(SubscriberError::Delivery {
            message: "mailbox full".to_string(),
        })
    }
}

fn deal_lost_event() -> DomainEvent {
    DomainEvent::new(
        &Actor::user(UserId::new(1), "Ann", Role::SalesRep),
        Subject::deal(DealId::new()),
        EventPayload::DealLost {
            reason: "budget".to_string(),
        },
        Timestamp::now(),
    )
}

mod payload_tests {
    use super::*;

    #[test]
    fn test_names_are_dotted() {
        let payload = EventPayload::DealStageChanged {
            from: DealStage::New,
            to: DealStage::Proposal,
            probability: None,
        };
        assert_eq!(payload.name(), "deal.stage_changed");
        assert_eq!(EventPayload::ContactRestored.name(), "contact.restored");
    }

    #[test]
    fn test_properties_drop_tag() {
        let payload = EventPayload::DealWon {
            won_amount: Amount::new(950),
            currency: "USD".to_string(),
        };

        let properties = payload.properties();

        assert_eq!(properties.get("won_amount"), Some(&serde_json::json!(950)));
        assert!(!properties.contains_key("event"));
    }

    #[test]
    fn test_receipt_id_only_on_pipeline_events() {
        let receipt_id = ReceiptId::new();
        let created = EventPayload::ContactCreated {
            receipt_id: Some(receipt_id),
        };

        assert_eq!(created.receipt_id(), Some(receipt_id));
        assert_eq!(EventPayload::DealDeleted.receipt_id(), None);
    }

    #[test]
    fn test_system_actor_leaves_actor_empty() {
        let event = DomainEvent::new(
            &Actor::system(),
            Subject::contact(ContactId::new()),
            EventPayload::ContactCreated { receipt_id: None },
            Timestamp::now(),
        );
        assert!(event.actor.is_none());
    }
}

mod dispatcher_tests {
    use super::*;

    /// Verify that subscribers run in registration order
    #[tokio::test]
    async fn test_publish_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new()
            .with_subscriber(Arc::new(RecordingSubscriber {
                label: "first",
                seen: seen.clone(),
            }))
            .with_subscriber(Arc::new(RecordingSubscriber {
                label: "second",
                seen: seen.clone(),
            }));

        let delivered = dispatcher.publish(&deal_lost_event()).await;

        assert_eq!(delivered, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:deal.lost".to_string(), "second:deal.lost".to_string()]
        );
    }

    /// Verify that a failing subscriber does not stop later subscribers
    #[tokio::test]
    async fn test_failing_subscriber_is_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new()
            .with_subscriber(Arc::new(FailingSubscriber))
            .with_subscriber(Arc::new(RecordingSubscriber {
                label: "after",
                seen: seen.clone(),
            }));

        let delivered = dispatcher.publish(&deal_lost_event()).await;

        assert_eq!(delivered, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.publish(&deal_lost_event()).await, 0);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
