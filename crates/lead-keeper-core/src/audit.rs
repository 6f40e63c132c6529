//! # Audit Trail
//!
//! Append-only record of who changed what. Entries are written either
//! transactionally by the lead pipeline or by [`AuditSubscriber`] from
//! published domain events. The contact timeline reads them back.

use crate::events::{DomainEvent, EventSubscriber, SubscriberError};
use crate::storage::StorageError;
use crate::{AuditEntryId, ContactId, DealId, ReceiptId, TaskId, Timestamp, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of record an audit entry or event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Contact,
    Deal,
    Receipt,
    Task,
    Export,
}

impl SubjectKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Deal => "deal",
            Self::Receipt => "receipt",
            Self::Task => "task",
            Self::Export => "export",
        }
    }
}

/// Reference to the record an entry is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: String,
}

impl Subject {
    pub fn contact(id: ContactId) -> Self {
        Self {
            kind: SubjectKind::Contact,
            id: id.to_string(),
        }
    }

    pub fn deal(id: DealId) -> Self {
        Self {
            kind: SubjectKind::Deal,
            id: id.to_string(),
        }
    }

    pub fn receipt(id: ReceiptId) -> Self {
        Self {
            kind: SubjectKind::Receipt,
            id: id.to_string(),
        }
    }

    pub fn task(id: TaskId) -> Self {
        Self {
            kind: SubjectKind::Task,
            id: id.to_string(),
        }
    }

    /// Subject of a bulk export, identified by the exported resource
    pub fn export(resource: &str) -> Self {
        Self {
            kind: SubjectKind::Export,
            id: resource.to_string(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

/// Inclusive time window; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl TimeRange {
    /// Window with no bounds
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether the timestamp falls inside the window
    pub fn contains(&self, at: Timestamp) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    /// `None` for system actions
    pub actor: Option<UserId>,
    pub subject: Subject,
    /// Dotted action label, e.g. `deal.won`
    pub action: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub created_at: Timestamp,
}

impl AuditEntry {
    pub fn new(
        actor: Option<UserId>,
        subject: Subject,
        action: impl Into<String>,
        properties: serde_json::Map<String, serde_json::Value>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            actor,
            subject,
            action: action.into(),
            properties,
            created_at,
        }
    }

    /// Audit entry mirroring a published event
    pub fn from_event(event: &DomainEvent) -> Self {
        Self::new(
            event.actor,
            event.subject.clone(),
            event.name(),
            event.payload.properties(),
            event.occurred_at,
        )
    }
}

/// Append-only audit storage
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append an entry
    async fn record(&self, entry: AuditEntry) -> Result<AuditEntryId, StorageError>;

    /// Entries about any of the subjects within the window, oldest first
    async fn list_for_subjects(
        &self,
        subjects: &[Subject],
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StorageError>;

    /// Remove entries created before the cutoff; returns how many were removed
    async fn prune_older_than(&self, cutoff: Timestamp) -> Result<usize, StorageError>;
}

/// Writes an audit entry for every published event
///
/// Events carrying a receipt id were already audited inside the lead
/// pipeline's commit and are skipped.
pub struct AuditSubscriber {
    log: Arc<dyn AuditLog>,
}

impl AuditSubscriber {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EventSubscriber for AuditSubscriber {
    fn name(&self) -> &str {
        "audit"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        if event.payload.receipt_id().is_some() {
            return Ok(());
        }
        self.log.record(AuditEntry::from_event(event)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
