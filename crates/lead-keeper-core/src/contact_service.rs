//! # Contact Service
//!
//! Operator CRUD over contacts plus bulk export. Email stays unique among
//! live contacts; a clash surfaces as [`ContactError::Conflict`].

use crate::audit::Subject;
use crate::authz::{Actor, AuthorizationError, Capability};
use crate::contact::{Contact, ContactDraft, ContactPatch};
use crate::events::{DomainEvent, EventDispatcher, EventPayload};
use crate::storage::{ContactFilter, ContactStore, StorageError};
use crate::{ContactId, ParseError, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("Contact not found: {0}")]
    NotFound(ContactId),

    #[error("Another contact already uses {field} {value}")]
    Conflict { field: String, value: String },

    #[error("Invalid transition: {message}")]
    InvalidTransition { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for ContactError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::UniqueViolation { field, value } => Self::Conflict { field, value },
            other => Self::Storage(other),
        }
    }
}

/// Serialization used by [`ContactService::export`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON array
    #[default]
    Json,
    /// One JSON object per line
    Jsonl,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Jsonl => "application/x-ndjson",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            _ => Err(ParseError::InvalidFormat {
                expected: "json or jsonl".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Rendered export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactExport {
    pub format: ExportFormat,
    pub record_count: usize,
    pub content: String,
}

pub struct ContactService {
    contacts: Arc<dyn ContactStore>,
    events: Arc<EventDispatcher>,
}

impl ContactService {
    pub fn new(contacts: Arc<dyn ContactStore>, events: Arc<EventDispatcher>) -> Self {
        Self { contacts, events }
    }

    #[instrument(skip(self, actor, draft))]
    pub async fn create(&self, actor: &Actor, draft: ContactDraft) -> Result<Contact, ContactError> {
        actor.require(Capability::ManageContacts)?;

        let now = Timestamp::now();
        let mut contact = draft.into_contact(now)?;
        if contact.owner_id.is_none() {
            contact.owner_id = actor.user_id;
        }
        self.contacts.insert_contact(&contact).await?;

        info!(contact_id = %contact.id, "Contact created");
        self.publish(actor, contact.id, EventPayload::ContactCreated { receipt_id: None }, now)
            .await;
        Ok(contact)
    }

    #[instrument(skip(self, actor), fields(contact_id = %id))]
    pub async fn get(&self, actor: &Actor, id: ContactId) -> Result<Contact, ContactError> {
        actor.require(Capability::ViewContacts)?;
        self.load_live(id).await
    }

    #[instrument(skip(self, actor))]
    pub async fn list(&self, actor: &Actor, filter: ContactFilter) -> Result<Vec<Contact>, ContactError> {
        actor.require(Capability::ViewContacts)?;
        Ok(self.contacts.list_contacts(filter).await?)
    }

    /// Apply a partial update; an update that changes nothing publishes nothing
    #[instrument(skip(self, actor, patch), fields(contact_id = %id))]
    pub async fn update(
        &self,
        actor: &Actor,
        id: ContactId,
        patch: ContactPatch,
    ) -> Result<Contact, ContactError> {
        actor.require(Capability::ManageContacts)?;
        let mut contact = self.load_live(id).await?;

        let now = Timestamp::now();
        let changed_fields = patch.apply(&mut contact, now)?;
        if changed_fields.is_empty() {
            return Ok(contact);
        }
        self.contacts.update_contact(&contact).await?;

        info!(changed = changed_fields.len(), "Contact updated");
        self.publish(
            actor,
            contact.id,
            EventPayload::ContactUpdated {
                changed_fields,
                receipt_id: None,
            },
            now,
        )
        .await;
        Ok(contact)
    }

    #[instrument(skip(self, actor), fields(contact_id = %id))]
    pub async fn delete(&self, actor: &Actor, id: ContactId) -> Result<Contact, ContactError> {
        actor.require(Capability::ManageContacts)?;
        let mut contact = self.load_live(id).await?;

        let now = Timestamp::now();
        contact.deleted_at = Some(now);
        contact.updated_at = now;
        self.contacts.update_contact(&contact).await?;

        info!("Contact deleted");
        self.publish(actor, contact.id, EventPayload::ContactDeleted, now).await;
        Ok(contact)
    }

    /// Bring back a soft-deleted contact
    ///
    /// Fails with a conflict when a live contact has taken its email since.
    #[instrument(skip(self, actor), fields(contact_id = %id))]
    pub async fn restore(&self, actor: &Actor, id: ContactId) -> Result<Contact, ContactError> {
        actor.require(Capability::ManageContacts)?;
        let mut contact = self
            .contacts
            .get_contact(id)
            .await?
            .ok_or(ContactError::NotFound(id))?;
        if !contact.is_deleted() {
            return Err(ContactError::InvalidTransition {
                message: format!("contact {} is not deleted", id),
            });
        }

        let now = Timestamp::now();
        contact.deleted_at = None;
        contact.updated_at = now;
        self.contacts.update_contact(&contact).await?;

        info!("Contact restored");
        self.publish(actor, contact.id, EventPayload::ContactRestored, now).await;
        Ok(contact)
    }

    /// Export every live contact
    #[instrument(skip(self, actor), fields(format = %format))]
    pub async fn export(&self, actor: &Actor, format: ExportFormat) -> Result<ContactExport, ContactError> {
        actor.require(Capability::ExportData)?;

        let contacts = self.contacts.list_contacts(ContactFilter::default()).await?;
        let content = match format {
            ExportFormat::Json => serde_json::to_string(&contacts).map_err(StorageError::from)?,
            ExportFormat::Jsonl => {
                let mut lines = Vec::with_capacity(contacts.len());
                for contact in &contacts {
                    lines.push(serde_json::to_string(contact).map_err(StorageError::from)?);
                }
                lines.join("\n")
            }
        };

        let record_count = contacts.len();
        info!(record_count, "Contacts exported");
        self.events
            .publish(&DomainEvent::new(
                actor,
                Subject::export("contacts"),
                EventPayload::DataExported {
                    resource: "contacts".to_string(),
                    format: format.as_str().to_string(),
                    record_count,
                },
                Timestamp::now(),
            ))
            .await;

        Ok(ContactExport {
            format,
            record_count,
            content,
        })
    }

    async fn load_live(&self, id: ContactId) -> Result<Contact, ContactError> {
        match self.contacts.get_contact(id).await? {
            Some(contact) if !contact.is_deleted() => Ok(contact),
            _ => Err(ContactError::NotFound(id)),
        }
    }

    async fn publish(&self, actor: &Actor, id: ContactId, payload: EventPayload, now: Timestamp) {
        self.events
            .publish(&DomainEvent::new(actor, Subject::contact(id), payload, now))
            .await;
    }
}

#[cfg(test)]
#[path = "contact_service_tests.rs"]
mod tests;
