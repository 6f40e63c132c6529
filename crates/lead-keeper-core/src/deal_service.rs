//! # Deal Service
//!
//! Operator-facing deal operations. Every call follows the same shape:
//! authorize, load, apply the state machine, persist, publish, return the
//! updated deal. A rejected call changes nothing and publishes nothing.
//!
//! Soft-deleted deals are invisible to every operation except
//! [`DealService::restore`].

use crate::audit::Subject;
use crate::authz::{Actor, AuthorizationError, Capability};
use crate::deal::{Amount, Deal, DealError, DealStage, NewDeal};
use crate::events::{DomainEvent, EventDispatcher, EventPayload};
use crate::storage::{ContactStore, DealStore, StorageError};
use crate::{ContactId, DealId, Timestamp, UserId, ValidationError};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum DealServiceError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Deal(#[from] DealError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DealServiceError {
    fn deal_not_found(id: DealId) -> Self {
        Self::NotFound {
            entity: "deal",
            id: id.to_string(),
        }
    }
}

pub struct DealService {
    deals: Arc<dyn DealStore>,
    contacts: Arc<dyn ContactStore>,
    events: Arc<EventDispatcher>,
}

impl DealService {
    pub fn new(
        deals: Arc<dyn DealStore>,
        contacts: Arc<dyn ContactStore>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            deals,
            contacts,
            events,
        }
    }

    /// Open a new deal against a live contact
    #[instrument(skip(self, actor, input), fields(contact_id = %input.contact_id))]
    pub async fn create(&self, actor: &Actor, input: NewDeal) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ManageDeals)?;
        let created_by = actor.user_id.ok_or_else(|| ValidationError::Required {
            field: "created_by".to_string(),
        })?;

        match self.contacts.get_contact(input.contact_id).await? {
            Some(contact) if !contact.is_deleted() => {}
            _ => {
                return Err(DealServiceError::NotFound {
                    entity: "contact",
                    id: input.contact_id.to_string(),
                })
            }
        }

        let now = Timestamp::now();
        let deal = input.into_deal(created_by, now)?;
        self.deals.insert_deal(&deal).await?;

        info!(deal_id = %deal.id, amount = %deal.amount, "Deal created");
        self.publish(
            actor,
            &deal,
            EventPayload::DealCreated {
                title: deal.title.clone(),
                amount: deal.amount,
                currency: deal.currency.clone(),
                stage: deal.stage,
                contact_id: deal.contact_id,
            },
            now,
        )
        .await;
        Ok(deal)
    }

    #[instrument(skip(self, actor), fields(deal_id = %id))]
    pub async fn get(&self, actor: &Actor, id: DealId) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ViewDeals)?;
        self.load_live(id).await
    }

    /// Live deals attached to a contact, oldest first
    #[instrument(skip(self, actor), fields(contact_id = %contact_id))]
    pub async fn list_for_contact(
        &self,
        actor: &Actor,
        contact_id: ContactId,
    ) -> Result<Vec<Deal>, DealServiceError> {
        actor.require(Capability::ViewDeals)?;
        Ok(self.deals.list_deals_for_contact(contact_id, false).await?)
    }

    #[instrument(skip(self, actor), fields(deal_id = %id, stage = %stage))]
    pub async fn change_stage(
        &self,
        actor: &Actor,
        id: DealId,
        stage: DealStage,
        probability: Option<u8>,
    ) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ManageDeals)?;
        let mut deal = self.load_live(id).await?;

        let now = Timestamp::now();
        let change = deal.change_stage(stage, probability, now)?;
        self.deals.update_deal(&deal).await?;

        info!(from = %change.from, to = %change.to, "Deal stage changed");
        self.publish(
            actor,
            &deal,
            EventPayload::DealStageChanged {
                from: change.from,
                to: change.to,
                probability: change.probability,
            },
            now,
        )
        .await;
        Ok(deal)
    }

    /// Close as won; the final amount defaults to the deal amount
    #[instrument(skip(self, actor), fields(deal_id = %id))]
    pub async fn mark_won(
        &self,
        actor: &Actor,
        id: DealId,
        won_amount: Option<Amount>,
    ) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ManageDeals)?;
        let mut deal = self.load_live(id).await?;

        let now = Timestamp::now();
        let resolved = deal.mark_as_won(won_amount, now)?;
        self.deals.update_deal(&deal).await?;

        info!(won_amount = %resolved, "Deal won");
        self.publish(
            actor,
            &deal,
            EventPayload::DealWon {
                won_amount: resolved,
                currency: deal.currency.clone(),
            },
            now,
        )
        .await;
        Ok(deal)
    }

    #[instrument(skip(self, actor, reason), fields(deal_id = %id))]
    pub async fn mark_lost(&self, actor: &Actor, id: DealId, reason: &str) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ManageDeals)?;
        let mut deal = self.load_live(id).await?;

        let now = Timestamp::now();
        deal.mark_as_lost(reason, now)?;
        self.deals.update_deal(&deal).await?;

        info!("Deal lost");
        self.publish(
            actor,
            &deal,
            EventPayload::DealLost {
                reason: reason.to_string(),
            },
            now,
        )
        .await;
        Ok(deal)
    }

    #[instrument(skip(self, actor), fields(deal_id = %id, owner = %owner))]
    pub async fn assign(&self, actor: &Actor, id: DealId, owner: UserId) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ManageDeals)?;
        let mut deal = self.load_live(id).await?;

        let now = Timestamp::now();
        let assignment = deal.assign(owner, now)?;
        self.deals.update_deal(&deal).await?;

        info!(from = %assignment.from, "Deal reassigned");
        self.publish(
            actor,
            &deal,
            EventPayload::DealAssigned {
                from: assignment.from,
                to: assignment.to,
            },
            now,
        )
        .await;
        Ok(deal)
    }

    #[instrument(skip(self, actor), fields(deal_id = %id))]
    pub async fn delete(&self, actor: &Actor, id: DealId) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ManageDeals)?;
        let mut deal = self.load_live(id).await?;

        let now = Timestamp::now();
        deal.soft_delete(now)?;
        self.deals.update_deal(&deal).await?;

        info!("Deal deleted");
        self.publish(actor, &deal, EventPayload::DealDeleted, now).await;
        Ok(deal)
    }

    /// Bring a soft-deleted deal back as open
    #[instrument(skip(self, actor), fields(deal_id = %id))]
    pub async fn restore(&self, actor: &Actor, id: DealId) -> Result<Deal, DealServiceError> {
        actor.require(Capability::ManageDeals)?;
        let mut deal = self
            .deals
            .get_deal(id)
            .await?
            .ok_or_else(|| DealServiceError::deal_not_found(id))?;

        let now = Timestamp::now();
        deal.restore(now)?;
        self.deals.update_deal(&deal).await?;

        info!(stage = %deal.stage, "Deal restored");
        self.publish(actor, &deal, EventPayload::DealRestored, now).await;
        Ok(deal)
    }

    async fn load_live(&self, id: DealId) -> Result<Deal, DealServiceError> {
        match self.deals.get_deal(id).await? {
            Some(deal) if !deal.is_deleted() => Ok(deal),
            _ => Err(DealServiceError::deal_not_found(id)),
        }
    }

    async fn publish(&self, actor: &Actor, deal: &Deal, payload: EventPayload, now: Timestamp) {
        self.events
            .publish(&DomainEvent::new(actor, Subject::deal(deal.id), payload, now))
            .await;
    }
}

#[cfg(test)]
#[path = "deal_service_tests.rs"]
mod tests;
