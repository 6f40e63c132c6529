//! # Storage Ports
//!
//! Persistence traits the services depend on. Adapters live in
//! [`crate::adapters`].
//!
//! Adapters must provide two guarantees:
//! - idempotency keys are unique across receipts ([`ReceiptStore::insert_if_absent`])
//! - normalized emails are unique across non-deleted contacts, and
//!   [`ContactStore::commit_lead`] commits the contact and its audit entry
//!   together or not at all

use crate::activity::{EmailActivity, Task};
use crate::audit::AuditEntry;
use crate::contact::{Contact, ContactStatus, LeadResolution};
use crate::deal::Deal;
use crate::failure::WebhookFailureRecord;
use crate::receipt::{ReceiptStatus, WebhookReceipt};
use crate::{ContactId, DealId, FailureId, IdempotencyKey, ReceiptId, TaskId};
use async_trait::async_trait;

/// Errors raised by storage adapters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unique constraint violated: {field} '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Invalid state transition: {message}")]
    InvalidTransition { message: String },

    #[error("Storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },
}

impl StorageError {
    /// Check if the operation may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

// ============================================================================
// Receipts
// ============================================================================

/// Result of inserting a receipt keyed by idempotency key
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The key was new; the receipt was stored
    Inserted(WebhookReceipt),
    /// The key already existed; the stored receipt is returned unchanged
    Duplicate(WebhookReceipt),
}

impl InsertOutcome {
    pub fn receipt(&self) -> &WebhookReceipt {
        match self {
            Self::Inserted(r) | Self::Duplicate(r) => r,
        }
    }
}

/// Result of trying to start a processing attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The receipt moved to `processing`; the caller owns this attempt
    Claimed(WebhookReceipt),
    /// Processing already finished
    AlreadyProcessed(WebhookReceipt),
    /// Another worker holds the receipt
    InFlight(WebhookReceipt),
}

/// Receipt listing filter; results are newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptFilter {
    pub status: Option<ReceiptStatus>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Store the receipt unless its idempotency key is already known
    async fn insert_if_absent(&self, receipt: WebhookReceipt) -> Result<InsertOutcome, StorageError>;

    async fn get(&self, id: ReceiptId) -> Result<Option<WebhookReceipt>, StorageError>;

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<WebhookReceipt>, StorageError>;

    /// Atomically begin an attempt if the receipt is `pending` or `failed`
    async fn claim(&self, id: ReceiptId) -> Result<ClaimOutcome, StorageError>;

    /// Overwrite a stored receipt
    async fn update(&self, receipt: &WebhookReceipt) -> Result<(), StorageError>;

    async fn list(&self, filter: ReceiptFilter) -> Result<Vec<WebhookReceipt>, StorageError>;
}

// ============================================================================
// Contacts
// ============================================================================

/// What to write for one lead: the resolved contact plus its audit entry
#[derive(Debug, Clone, PartialEq)]
pub struct LeadCommit {
    pub resolution: LeadResolution,
    pub audit: AuditEntry,
}

/// Builds a [`LeadCommit`] from the contact currently owning the lead's email
pub type LeadPlan = dyn Fn(Option<&Contact>) -> LeadCommit + Send + Sync;

/// Contact listing filter; results are oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFilter {
    pub include_deleted: bool,
    pub status: Option<ContactStatus>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Fetch a contact, including soft-deleted ones
    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Non-deleted contact owning the normalized email
    async fn find_by_email(&self, email: &str) -> Result<Option<Contact>, StorageError>;

    async fn insert_contact(&self, contact: &Contact) -> Result<(), StorageError>;

    async fn update_contact(&self, contact: &Contact) -> Result<(), StorageError>;

    async fn list_contacts(&self, filter: ContactFilter) -> Result<Vec<Contact>, StorageError>;

    /// Match, create-or-update and audit a lead in one atomic step
    ///
    /// `plan` is called with the non-deleted contact owning `email` (always
    /// `None` when `email` is `None`) and must not perform I/O.
    async fn commit_lead(
        &self,
        email: Option<&str>,
        plan: &LeadPlan,
    ) -> Result<LeadResolution, StorageError>;
}

// ============================================================================
// Deals, failures and activity
// ============================================================================

#[async_trait]
pub trait DealStore: Send + Sync {
    async fn insert_deal(&self, deal: &Deal) -> Result<(), StorageError>;

    /// Fetch a deal, including soft-deleted ones
    async fn get_deal(&self, id: DealId) -> Result<Option<Deal>, StorageError>;

    async fn update_deal(&self, deal: &Deal) -> Result<(), StorageError>;

    /// Deals attached to the contact, oldest first
    async fn list_deals_for_contact(
        &self,
        contact_id: ContactId,
        include_deleted: bool,
    ) -> Result<Vec<Deal>, StorageError>;
}

#[async_trait]
pub trait FailureStore: Send + Sync {
    /// Append a terminal failure record
    async fn record_failure(&self, record: WebhookFailureRecord) -> Result<FailureId, StorageError>;

    async fn get_failure(&self, id: FailureId) -> Result<Option<WebhookFailureRecord>, StorageError>;

    /// Failure records, newest first
    async fn list_failures(&self, limit: Option<usize>) -> Result<Vec<WebhookFailureRecord>, StorageError>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<(), StorageError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError>;

    async fn update_task(&self, task: &Task) -> Result<(), StorageError>;

    async fn list_tasks_for_contact(&self, contact_id: ContactId) -> Result<Vec<Task>, StorageError>;

    async fn insert_email(&self, email: &EmailActivity) -> Result<(), StorageError>;

    async fn list_emails_for_contact(
        &self,
        contact_id: ContactId,
    ) -> Result<Vec<EmailActivity>, StorageError>;
}
