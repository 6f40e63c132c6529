use super::*;
use crate::adapters::MemoryCrmStore;
use crate::authz::{Actor, Role};
use crate::events::EventPayload;

fn event(payload: EventPayload, subject: Subject) -> DomainEvent {
    DomainEvent::new(
        &Actor::user(UserId::new(5), "Sam", Role::SalesManager),
        subject,
        payload,
        Timestamp::now(),
    )
}

/// Verify that operator events become audit entries
#[tokio::test]
async fn test_subscriber_records_event() {
    let store = Arc::new(MemoryCrmStore::new());
    let subscriber = AuditSubscriber::new(store.clone());
    let subject = Subject::deal(DealId::new());

    subscriber
        .handle(&event(
            EventPayload::DealLost {
                reason: "timing".to_string(),
            },
            subject.clone(),
        ))
        .await
        .unwrap();

    let entries = store
        .list_for_subjects(&[subject], TimeRange::all())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "deal.lost");
    assert_eq!(entries[0].actor, Some(UserId::new(5)));
    assert_eq!(
        entries[0].properties.get("reason"),
        Some(&serde_json::json!("timing"))
    );
}

/// Verify that pipeline events are not audited twice
#[tokio::test]
async fn test_subscriber_skips_pipeline_events() {
    let store = Arc::new(MemoryCrmStore::new());
    let subscriber = AuditSubscriber::new(store.clone());
    let subject = Subject::contact(ContactId::new());

    subscriber
        .handle(&event(
            EventPayload::ContactCreated {
                receipt_id: Some(ReceiptId::new()),
            },
            subject.clone(),
        ))
        .await
        .unwrap();

    let entries = store
        .list_for_subjects(&[subject], TimeRange::all())
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[test]
fn test_time_range_bounds_are_inclusive() {
    let at = Timestamp::from_rfc3339("2024-05-01T12:00:00Z").unwrap();
    let range = TimeRange {
        from: Some(at),
        to: Some(at),
    };

    assert!(range.contains(at));
    assert!(!range.contains(at.add_duration(std::time::Duration::from_secs(1))));
    assert!(TimeRange::all().contains(at));
}

#[test]
fn test_subject_display() {
    let subject = Subject::export("contacts");
    assert_eq!(subject.to_string(), "export/contacts");
}
