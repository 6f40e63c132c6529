use super::*;
use crate::adapters::MemoryCrmStore;
use crate::audit::{AuditLog, AuditSubscriber, TimeRange};
use crate::authz::Role;
use crate::contact::{Contact, ContactStatus};
use crate::deal::DealStatus;

struct Fixture {
    store: Arc<MemoryCrmStore>,
    service: DealService,
    contact_id: ContactId,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryCrmStore::new());
    let contact = Contact::new(ContactStatus::Lead, Timestamp::now());
    store.insert_contact(&contact).await.unwrap();

    let events = EventDispatcher::new().with_subscriber(Arc::new(AuditSubscriber::new(store.clone())));
    let service = DealService::new(store.clone(), store.clone(), Arc::new(events));
    Fixture {
        store,
        service,
        contact_id: contact.id,
    }
}

fn rep() -> Actor {
    Actor::user(UserId::new(7), "Rae", Role::SalesRep)
}

fn viewer() -> Actor {
    Actor::user(UserId::new(8), "Val", Role::Viewer)
}

fn new_deal(contact_id: ContactId) -> NewDeal {
    NewDeal {
        title: "Annual licence".to_string(),
        amount: Amount::new(1000),
        currency: "usd".to_string(),
        stage: DealStage::New,
        probability: None,
        expected_close_date: None,
        owner_id: None,
        contact_id,
        product_id: None,
    }
}

async fn audit_actions(store: &MemoryCrmStore, deal_id: DealId) -> Vec<String> {
    store
        .list_for_subjects(&[Subject::deal(deal_id)], TimeRange::all())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect()
}

mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_defaults_owner_and_publishes() {
        let f = fixture().await;

        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();

        assert_eq!(deal.owner_id, UserId::new(7));
        assert_eq!(deal.created_by, UserId::new(7));
        assert_eq!(deal.currency, "USD");
        assert_eq!(audit_actions(&f.store, deal.id).await, vec!["deal.created"]);
    }

    #[tokio::test]
    async fn test_create_requires_live_contact() {
        let f = fixture().await;

        let result = f.service.create(&rep(), new_deal(ContactId::new())).await;

        assert!(matches!(
            result,
            Err(DealServiceError::NotFound { entity: "contact", .. })
        ));
    }

    /// Verify that a denied call writes nothing
    #[tokio::test]
    async fn test_viewer_cannot_create() {
        let f = fixture().await;

        let result = f.service.create(&viewer(), new_deal(f.contact_id)).await;

        assert!(matches!(result, Err(DealServiceError::Unauthorized(_))));
        assert!(f
            .store
            .list_deals_for_contact(f.contact_id, true)
            .await
            .unwrap()
            .is_empty());
    }
}

mod transition_tests {
    use super::*;

    #[tokio::test]
    async fn test_won_defaults_to_deal_amount() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();

        let won = f.service.mark_won(&rep(), deal.id, None).await.unwrap();

        assert_eq!(won.status, DealStatus::Won);
        assert_eq!(won.won_amount, Some(Amount::new(1000)));
        let stored = f.service.get(&viewer(), deal.id).await.unwrap();
        assert_eq!(stored, won);
    }

    #[tokio::test]
    async fn test_won_with_explicit_amount() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();

        let won = f
            .service
            .mark_won(&rep(), deal.id, Some(Amount::new(950)))
            .await
            .unwrap();

        assert_eq!(won.won_amount, Some(Amount::new(950)));
    }

    /// Verify that closed deals reject further closing and stage moves
    #[tokio::test]
    async fn test_closed_deal_is_terminal() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();
        f.service
            .mark_lost(&rep(), deal.id, "Budget cut")
            .await
            .unwrap();

        let won = f.service.mark_won(&rep(), deal.id, None).await;
        let lost = f.service.mark_lost(&rep(), deal.id, "Another reason").await;
        let stage = f
            .service
            .change_stage(&rep(), deal.id, DealStage::Proposal, None)
            .await;

        for result in [won, lost, stage] {
            assert!(matches!(
                result,
                Err(DealServiceError::Deal(DealError::InvalidTransition {
                    status: DealStatus::Lost,
                    ..
                }))
            ));
        }
        assert_eq!(
            audit_actions(&f.store, deal.id).await,
            vec!["deal.created", "deal.lost"]
        );
    }

    #[tokio::test]
    async fn test_short_lost_reason_changes_nothing() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();

        let result = f.service.mark_lost(&rep(), deal.id, " no ").await;

        assert!(matches!(
            result,
            Err(DealServiceError::Deal(DealError::Validation(_)))
        ));
        let stored = f.service.get(&rep(), deal.id).await.unwrap();
        assert_eq!(stored.status, DealStatus::Open);
    }

    #[tokio::test]
    async fn test_change_stage_and_assign() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();

        let staged = f
            .service
            .change_stage(&rep(), deal.id, DealStage::Proposal, Some(60))
            .await
            .unwrap();
        let assigned = f
            .service
            .assign(&rep(), deal.id, UserId::new(11))
            .await
            .unwrap();

        assert_eq!(staged.stage, DealStage::Proposal);
        assert_eq!(staged.probability, Some(60));
        assert_eq!(assigned.owner_id, UserId::new(11));
        assert_eq!(
            audit_actions(&f.store, deal.id).await,
            vec!["deal.created", "deal.stage_changed", "deal.assigned"]
        );
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_deleted_deal_is_hidden() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();

        f.service.delete(&rep(), deal.id).await.unwrap();

        assert!(matches!(
            f.service.get(&rep(), deal.id).await,
            Err(DealServiceError::NotFound { entity: "deal", .. })
        ));
        assert!(f
            .service
            .list_for_contact(&rep(), f.contact_id)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            f.service.mark_won(&rep(), deal.id, None).await,
            Err(DealServiceError::NotFound { .. })
        ));
    }

    /// Verify that restoring a won deal reopens it with closing data cleared
    #[tokio::test]
    async fn test_restore_reopens_won_deal() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();
        f.service.mark_won(&rep(), deal.id, None).await.unwrap();
        f.service.delete(&rep(), deal.id).await.unwrap();

        let restored = f.service.restore(&rep(), deal.id).await.unwrap();

        assert_eq!(restored.status, DealStatus::Open);
        assert_eq!(restored.stage, DealStage::Negotiation);
        assert!(restored.won_amount.is_none());
        assert!(restored.closed_at.is_none());
        assert!(restored.deleted_at.is_none());
        assert_eq!(
            f.service.list_for_contact(&rep(), f.contact_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_restore_live_deal_fails() {
        let f = fixture().await;
        let deal = f.service.create(&rep(), new_deal(f.contact_id)).await.unwrap();

        let result = f.service.restore(&rep(), deal.id).await;

        assert!(matches!(
            result,
            Err(DealServiceError::Deal(DealError::NotDeleted { .. }))
        ));
    }
}
