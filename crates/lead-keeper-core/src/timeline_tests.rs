//! Tests for the contact timeline.

use super::*;
use crate::activity::{EmailDirection, TaskStatus};
use crate::adapters::MemoryCrmStore;
use crate::authz::Role;
use crate::contact::{Contact, ContactStatus};
use crate::deal::{Amount, NewDeal};
use crate::{EmailId, TaskId};

fn at(minute: u32) -> Timestamp {
    Timestamp::from_rfc3339(&format!("2024-03-01T10:{:02}:00Z", minute)).unwrap()
}

fn viewer() -> Actor {
    Actor::user(UserId::new(9), "Val", Role::Viewer)
}

struct Fixture {
    store: Arc<MemoryCrmStore>,
    service: TimelineService,
    contact_id: ContactId,
}

/// Contact with one entry of each type:
/// system at :01, task created :02, deal created :03, email :04, task completed :05
async fn fixture() -> Fixture {
    let store = Arc::new(MemoryCrmStore::new());
    let contact = Contact::new(ContactStatus::Lead, at(0));
    let contact_id = contact.id;
    store.insert_contact(&contact).await.unwrap();

    store
        .record(AuditEntry::new(
            None,
            Subject::contact(contact_id),
            "contact.created",
            serde_json::Map::new(),
            at(1),
        ))
        .await
        .unwrap();

    store
        .insert_task(&Task {
            id: TaskId::new(),
            contact_id,
            deal_id: None,
            title: "Call back".to_string(),
            description: None,
            status: TaskStatus::Completed,
            due_at: None,
            completed_at: Some(at(5)),
            assignee: Some(UserId::new(1)),
            created_by: Some(UserId::new(1)),
            created_at: at(2),
            updated_at: at(5),
        })
        .await
        .unwrap();

    let deal = NewDeal {
        title: "Licence".to_string(),
        amount: Amount::new(1000),
        currency: "USD".to_string(),
        stage: Default::default(),
        probability: None,
        expected_close_date: None,
        owner_id: None,
        contact_id,
        product_id: None,
    }
    .into_deal(UserId::new(1), at(3))
    .unwrap();
    store.insert_deal(&deal).await.unwrap();
    store
        .record(AuditEntry::new(
            Some(UserId::new(1)),
            Subject::deal(deal.id),
            "deal.created",
            serde_json::Map::new(),
            at(3),
        ))
        .await
        .unwrap();

    store
        .insert_email(&EmailActivity {
            id: EmailId::new(),
            contact_id,
            direction: EmailDirection::Inbound,
            subject: "Re: pricing".to_string(),
            snippet: None,
            from_address: "jane@example.com".to_string(),
            to_address: "sales@example.com".to_string(),
            occurred_at: at(4),
            logged_by: None,
        })
        .await
        .unwrap();

    let service = TimelineService::new(store.clone(), store.clone(), store.clone(), store.clone());
    Fixture {
        store,
        service,
        contact_id,
    }
}

mod merge_tests {
    use super::*;

    /// Verify that all four sources are merged newest first
    #[tokio::test]
    async fn test_all_sources_newest_first() {
        let f = fixture().await;

        let page = f
            .service
            .query(&viewer(), TimelineQuery::for_contact(f.contact_id))
            .await
            .unwrap();

        let kinds: Vec<(TimelineEntryType, &str)> = page
            .entries
            .iter()
            .map(|e| (e.entry_type, e.subtype.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TimelineEntryType::Task, "completed"),
                (TimelineEntryType::Email, "inbound"),
                (TimelineEntryType::Deal, "created"),
                (TimelineEntryType::Task, "created"),
                (TimelineEntryType::System, "created"),
            ]
        );
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_deal_entries_link_to_deal() {
        let f = fixture().await;

        let mut query = TimelineQuery::for_contact(f.contact_id);
        query.types = [TimelineEntryType::Deal].into_iter().collect();
        let page = f.service.query(&viewer(), query).await.unwrap();

        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].title, "Deal \"Licence\" created");
        assert!(page.entries[0]
            .link
            .as_deref()
            .unwrap()
            .starts_with("/api/deals/"));
    }

    #[tokio::test]
    async fn test_type_filter() {
        let f = fixture().await;

        let mut query = TimelineQuery::for_contact(f.contact_id);
        query.types = [TimelineEntryType::Task, TimelineEntryType::Email]
            .into_iter()
            .collect();
        let page = f.service.query(&viewer(), query).await.unwrap();

        assert_eq!(page.entries.len(), 3);
        assert!(page
            .entries
            .iter()
            .all(|e| matches!(e.entry_type, TimelineEntryType::Task | TimelineEntryType::Email)));
    }

    #[tokio::test]
    async fn test_time_range_filter() {
        let f = fixture().await;

        let mut query = TimelineQuery::for_contact(f.contact_id);
        query.from = Some(at(2));
        query.to = Some(at(4));
        let page = f.service.query(&viewer(), query).await.unwrap();

        assert_eq!(page.entries.len(), 3);
        assert!(page
            .entries
            .iter()
            .all(|e| e.timestamp >= at(2) && e.timestamp <= at(4)));
    }

    /// Verify that other contacts' activity never leaks in
    #[tokio::test]
    async fn test_other_contact_is_isolated() {
        let f = fixture().await;
        let other = Contact::new(ContactStatus::Lead, at(0));
        f.store.insert_contact(&other).await.unwrap();

        let page = f
            .service
            .query(&viewer(), TimelineQuery::for_contact(other.id))
            .await
            .unwrap();

        assert!(page.entries.is_empty());
    }
}

mod paging_tests {
    use super::*;

    /// Verify that walking the cursor visits every entry exactly once
    #[tokio::test]
    async fn test_cursor_walk_visits_everything_once() {
        let f = fixture().await;
        let mut seen = Vec::new();
        let mut cursor = None;

        loop {
            let mut query = TimelineQuery::for_contact(f.contact_id);
            query.limit = Some(2);
            query.cursor = cursor.clone();
            let page = f.service.query(&viewer(), query).await.unwrap();
            seen.extend(page.entries.iter().map(|e| e.id.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 5);
        let unique: BTreeSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_limit_defaults_and_caps() {
        assert_eq!(effective_limit(None), 25);
        assert_eq!(effective_limit(Some(0)), 1);
        assert_eq!(effective_limit(Some(40)), 40);
        assert_eq!(effective_limit(Some(500)), 100);
    }

    #[test]
    fn test_cursor_encoding() {
        let cursor = Cursor {
            millis: 1_709_287_200_000,
            id: "email:01HQ".to_string(),
        };

        let encoded = cursor.encode();

        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);
    }

    #[tokio::test]
    async fn test_invalid_cursor_rejected() {
        let f = fixture().await;

        for bad in ["zz", "6869", hex::encode("abc:task").as_str()] {
            let mut query = TimelineQuery::for_contact(f.contact_id);
            query.cursor = Some(bad.to_string());
            let result = f.service.query(&viewer(), query).await;
            assert!(
                matches!(result, Err(TimelineError::Validation(_))),
                "cursor {} should be rejected",
                bad
            );
        }
    }

    /// Verify that entries sharing a millisecond are split by id, not dropped
    #[test]
    fn test_ties_broken_by_id() {
        let entry = |id: &str| TimelineEntry {
            id: id.to_string(),
            entry_type: TimelineEntryType::System,
            subtype: "updated".to_string(),
            timestamp: at(1),
            actor: None,
            title: "Contact updated".to_string(),
            summary: None,
            link: None,
            metadata: None,
        };
        let entries = vec![entry("a"), entry("c"), entry("b")];

        let first = paginate(entries.clone(), None, 2);
        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        let second = paginate(entries, Some(&cursor), 2);

        let ids: Vec<_> = first
            .entries
            .iter()
            .chain(second.entries.iter())
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert!(second.next_cursor.is_none());
    }
}

#[tokio::test]
async fn test_unknown_contact() {
    let f = fixture().await;

    let result = f
        .service
        .query(&viewer(), TimelineQuery::for_contact(ContactId::new()))
        .await;

    assert!(matches!(result, Err(TimelineError::ContactNotFound(_))));
}

#[test]
fn test_entry_type_parsing() {
    assert_eq!("Deal".parse::<TimelineEntryType>().unwrap(), TimelineEntryType::Deal);
    assert!("meeting".parse::<TimelineEntryType>().is_err());
}
