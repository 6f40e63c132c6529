//! # In-Memory CRM Store
//!
//! Single-process implementation of every storage port, guarded by one
//! async mutex so multi-record operations are atomic.
//!
//! When a snapshot path is configured, each mutation is applied to a copy of
//! the tables, written to disk (temp file + rename), and only then made
//! visible. A failed write leaves both memory and disk unchanged.

use crate::activity::{EmailActivity, Task};
use crate::audit::{AuditEntry, AuditLog, Subject, TimeRange};
use crate::contact::{Contact, LeadResolution};
use crate::deal::Deal;
use crate::failure::WebhookFailureRecord;
use crate::receipt::{ReceiptStatus, WebhookReceipt};
use crate::storage::*;
use crate::{
    AuditEntryId, ContactId, DealId, EmailId, FailureId, IdempotencyKey, ReceiptId, TaskId,
    Timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct Tables {
    receipts: BTreeMap<ReceiptId, WebhookReceipt>,
    receipt_keys: BTreeMap<IdempotencyKey, ReceiptId>,
    contacts: BTreeMap<ContactId, Contact>,
    deals: BTreeMap<DealId, Deal>,
    failures: BTreeMap<FailureId, WebhookFailureRecord>,
    tasks: BTreeMap<TaskId, Task>,
    emails: BTreeMap<EmailId, EmailActivity>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn live_contact_by_email(&self, email: &str) -> Option<&Contact> {
        self.contacts
            .values()
            .find(|c| !c.is_deleted() && c.email.as_deref() == Some(email))
    }

    fn ensure_unique_email(&self, contact: &Contact) -> Result<(), StorageError> {
        if contact.is_deleted() {
            return Ok(());
        }
        if let Some(email) = contact.email.as_deref() {
            if let Some(other) = self.live_contact_by_email(email) {
                if other.id != contact.id {
                    return Err(StorageError::UniqueViolation {
                        field: "email".to_string(),
                        value: email.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// On-disk layout of a snapshot
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    receipts: Vec<WebhookReceipt>,
    contacts: Vec<Contact>,
    deals: Vec<Deal>,
    failures: Vec<WebhookFailureRecord>,
    tasks: Vec<Task>,
    emails: Vec<EmailActivity>,
    audit: Vec<AuditEntry>,
}

impl From<&Tables> for Snapshot {
    fn from(tables: &Tables) -> Self {
        Self {
            receipts: tables.receipts.values().cloned().collect(),
            contacts: tables.contacts.values().cloned().collect(),
            deals: tables.deals.values().cloned().collect(),
            failures: tables.failures.values().cloned().collect(),
            tasks: tables.tasks.values().cloned().collect(),
            emails: tables.emails.values().cloned().collect(),
            audit: tables.audit.clone(),
        }
    }
}

impl From<Snapshot> for Tables {
    fn from(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();
        for receipt in snapshot.receipts {
            tables
                .receipt_keys
                .insert(receipt.idempotency_key.clone(), receipt.id);
            tables.receipts.insert(receipt.id, receipt);
        }
        tables.contacts = snapshot.contacts.into_iter().map(|c| (c.id, c)).collect();
        tables.deals = snapshot.deals.into_iter().map(|d| (d.id, d)).collect();
        tables.failures = snapshot.failures.into_iter().map(|f| (f.id, f)).collect();
        tables.tasks = snapshot.tasks.into_iter().map(|t| (t.id, t)).collect();
        tables.emails = snapshot.emails.into_iter().map(|e| (e.id, e)).collect();
        tables.audit = snapshot.audit;
        tables
    }
}

/// In-memory implementation of all storage ports
///
/// # Examples
///
/// ```rust
/// use lead_keeper_core::adapters::MemoryCrmStore;
/// use lead_keeper_core::storage::ContactStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryCrmStore::new();
/// assert!(store.find_by_email("a@b.com").await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryCrmStore {
    tables: Mutex<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryCrmStore {
    /// Create an empty store without persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store persisted to a JSON snapshot file
    ///
    /// Loads the snapshot if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let tables = match fs::read_to_string(&path).await {
            Ok(json) => {
                let snapshot: Snapshot = serde_json::from_str(&json)?;
                info!(
                    path = %path.display(),
                    receipts = snapshot.receipts.len(),
                    contacts = snapshot.contacts.len(),
                    "Loaded store snapshot"
                );
                Tables::from(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => {
                return Err(StorageError::Unavailable {
                    message: format!("Failed to read snapshot {}: {}", path.display(), e),
                })
            }
        };

        Ok(Self {
            tables: Mutex::new(tables),
            snapshot_path: Some(path),
        })
    }

    /// Path of the snapshot file, if persistence is enabled
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    async fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.lock().await;
        f(&tables)
    }

    async fn mutate<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut Tables) -> Result<R, StorageError> + Send,
        R: Send,
    {
        let mut tables = self.tables.lock().await;
        match &self.snapshot_path {
            None => f(&mut tables),
            Some(path) => {
                let mut staged = tables.clone();
                let result = f(&mut staged)?;
                write_snapshot(path, &staged).await?;
                *tables = staged;
                Ok(result)
            }
        }
    }
}

async fn write_snapshot(path: &Path, tables: &Tables) -> Result<(), StorageError> {
    let unavailable = |what: &str, e: std::io::Error| StorageError::Unavailable {
        message: format!("Failed to {} snapshot {}: {}", what, path.display(), e),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| unavailable("create directory for", e))?;
    }

    let json = serde_json::to_vec(&Snapshot::from(tables))?;
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| unavailable("create", e))?;
    file.write_all(&json)
        .await
        .map_err(|e| unavailable("write", e))?;
    file.flush().await.map_err(|e| unavailable("flush", e))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| unavailable("rename", e))?;

    debug!(path = %path.display(), bytes = json.len(), "Snapshot written");
    Ok(())
}

fn take<T>(items: impl Iterator<Item = T>, limit: Option<usize>) -> Vec<T> {
    items.take(limit.unwrap_or(usize::MAX)).collect()
}

// ============================================================================
// Receipts
// ============================================================================

#[async_trait]
impl ReceiptStore for MemoryCrmStore {
    async fn insert_if_absent(&self, receipt: WebhookReceipt) -> Result<InsertOutcome, StorageError> {
        // Duplicate check must not write a snapshot
        let existing = self
            .read(|t| {
                t.receipt_keys
                    .get(&receipt.idempotency_key)
                    .and_then(|id| t.receipts.get(id))
                    .cloned()
            })
            .await;
        if let Some(existing) = existing {
            return Ok(InsertOutcome::Duplicate(existing));
        }

        self.mutate(move |t| {
            if let Some(existing) = t
                .receipt_keys
                .get(&receipt.idempotency_key)
                .and_then(|id| t.receipts.get(id))
            {
                return Ok(InsertOutcome::Duplicate(existing.clone()));
            }
            t.receipt_keys
                .insert(receipt.idempotency_key.clone(), receipt.id);
            t.receipts.insert(receipt.id, receipt.clone());
            Ok(InsertOutcome::Inserted(receipt))
        })
        .await
    }

    async fn get(&self, id: ReceiptId) -> Result<Option<WebhookReceipt>, StorageError> {
        Ok(self.read(|t| t.receipts.get(&id).cloned()).await)
    }

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<WebhookReceipt>, StorageError> {
        Ok(self
            .read(|t| {
                t.receipt_keys
                    .get(key)
                    .and_then(|id| t.receipts.get(id))
                    .cloned()
            })
            .await)
    }

    async fn claim(&self, id: ReceiptId) -> Result<ClaimOutcome, StorageError> {
        self.mutate(|t| {
            let receipt = t
                .receipts
                .get_mut(&id)
                .ok_or_else(|| StorageError::not_found("receipt", id))?;
            match receipt.status {
                ReceiptStatus::Processed => Ok(ClaimOutcome::AlreadyProcessed(receipt.clone())),
                ReceiptStatus::Processing => Ok(ClaimOutcome::InFlight(receipt.clone())),
                ReceiptStatus::Pending | ReceiptStatus::Failed => {
                    receipt
                        .begin_attempt()
                        .map_err(|e| StorageError::InvalidTransition {
                            message: e.to_string(),
                        })?;
                    Ok(ClaimOutcome::Claimed(receipt.clone()))
                }
            }
        })
        .await
    }

    async fn update(&self, receipt: &WebhookReceipt) -> Result<(), StorageError> {
        self.mutate(|t| {
            let slot = t
                .receipts
                .get_mut(&receipt.id)
                .ok_or_else(|| StorageError::not_found("receipt", receipt.id))?;
            *slot = receipt.clone();
            Ok(())
        })
        .await
    }

    async fn list(&self, filter: ReceiptFilter) -> Result<Vec<WebhookReceipt>, StorageError> {
        Ok(self
            .read(|t| {
                let mut receipts: Vec<_> = t
                    .receipts
                    .values()
                    .filter(|r| filter.status.map_or(true, |s| r.status == s))
                    .cloned()
                    .collect();
                receipts.sort_by(|a, b| (b.received_at, b.id).cmp(&(a.received_at, a.id)));
                take(receipts.into_iter(), filter.limit)
            })
            .await)
    }
}

// ============================================================================
// Contacts
// ============================================================================

#[async_trait]
impl ContactStore for MemoryCrmStore {
    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        Ok(self.read(|t| t.contacts.get(&id).cloned()).await)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Contact>, StorageError> {
        Ok(self
            .read(|t| t.live_contact_by_email(email).cloned())
            .await)
    }

    async fn insert_contact(&self, contact: &Contact) -> Result<(), StorageError> {
        self.mutate(|t| {
            t.ensure_unique_email(contact)?;
            t.contacts.insert(contact.id, contact.clone());
            Ok(())
        })
        .await
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), StorageError> {
        self.mutate(|t| {
            if !t.contacts.contains_key(&contact.id) {
                return Err(StorageError::not_found("contact", contact.id));
            }
            t.ensure_unique_email(contact)?;
            t.contacts.insert(contact.id, contact.clone());
            Ok(())
        })
        .await
    }

    async fn list_contacts(&self, filter: ContactFilter) -> Result<Vec<Contact>, StorageError> {
        Ok(self
            .read(|t| {
                let mut contacts: Vec<_> = t
                    .contacts
                    .values()
                    .filter(|c| filter.include_deleted || !c.is_deleted())
                    .filter(|c| filter.status.map_or(true, |s| c.status == s))
                    .cloned()
                    .collect();
                contacts.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
                take(contacts.into_iter(), filter.limit)
            })
            .await)
    }

    async fn commit_lead(
        &self,
        email: Option<&str>,
        plan: &LeadPlan,
    ) -> Result<LeadResolution, StorageError> {
        self.mutate(|t| {
            let existing = email.and_then(|e| t.live_contact_by_email(e));
            let commit = plan(existing);

            let contact = commit.resolution.contact();
            t.ensure_unique_email(contact)?;
            t.contacts.insert(contact.id, contact.clone());
            t.audit.push(commit.audit);
            Ok(commit.resolution)
        })
        .await
    }
}

// ============================================================================
// Deals
// ============================================================================

#[async_trait]
impl DealStore for MemoryCrmStore {
    async fn insert_deal(&self, deal: &Deal) -> Result<(), StorageError> {
        self.mutate(|t| {
            t.deals.insert(deal.id, deal.clone());
            Ok(())
        })
        .await
    }

    async fn get_deal(&self, id: DealId) -> Result<Option<Deal>, StorageError> {
        Ok(self.read(|t| t.deals.get(&id).cloned()).await)
    }

    async fn update_deal(&self, deal: &Deal) -> Result<(), StorageError> {
        self.mutate(|t| {
            let slot = t
                .deals
                .get_mut(&deal.id)
                .ok_or_else(|| StorageError::not_found("deal", deal.id))?;
            *slot = deal.clone();
            Ok(())
        })
        .await
    }

    async fn list_deals_for_contact(
        &self,
        contact_id: ContactId,
        include_deleted: bool,
    ) -> Result<Vec<Deal>, StorageError> {
        Ok(self
            .read(|t| {
                let mut deals: Vec<_> = t
                    .deals
                    .values()
                    .filter(|d| d.contact_id == contact_id)
                    .filter(|d| include_deleted || !d.is_deleted())
                    .cloned()
                    .collect();
                deals.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
                deals
            })
            .await)
    }
}

// ============================================================================
// Failures
// ============================================================================

#[async_trait]
impl FailureStore for MemoryCrmStore {
    async fn record_failure(&self, record: WebhookFailureRecord) -> Result<FailureId, StorageError> {
        self.mutate(move |t| {
            let id = record.id;
            t.failures.insert(id, record);
            Ok(id)
        })
        .await
    }

    async fn get_failure(&self, id: FailureId) -> Result<Option<WebhookFailureRecord>, StorageError> {
        Ok(self.read(|t| t.failures.get(&id).cloned()).await)
    }

    async fn list_failures(&self, limit: Option<usize>) -> Result<Vec<WebhookFailureRecord>, StorageError> {
        Ok(self
            .read(|t| {
                let mut failures: Vec<_> = t.failures.values().cloned().collect();
                failures.sort_by(|a, b| (b.final_failed_at, b.id).cmp(&(a.final_failed_at, a.id)));
                take(failures.into_iter(), limit)
            })
            .await)
    }
}

// ============================================================================
// Activity
// ============================================================================

#[async_trait]
impl ActivityStore for MemoryCrmStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StorageError> {
        self.mutate(|t| {
            t.tasks.insert(task.id, task.clone());
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        Ok(self.read(|t| t.tasks.get(&id).cloned()).await)
    }

    async fn update_task(&self, task: &Task) -> Result<(), StorageError> {
        self.mutate(|t| {
            let slot = t
                .tasks
                .get_mut(&task.id)
                .ok_or_else(|| StorageError::not_found("task", task.id))?;
            *slot = task.clone();
            Ok(())
        })
        .await
    }

    async fn list_tasks_for_contact(&self, contact_id: ContactId) -> Result<Vec<Task>, StorageError> {
        Ok(self
            .read(|t| {
                let mut tasks: Vec<_> = t
                    .tasks
                    .values()
                    .filter(|task| task.contact_id == contact_id)
                    .cloned()
                    .collect();
                tasks.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
                tasks
            })
            .await)
    }

    async fn insert_email(&self, email: &EmailActivity) -> Result<(), StorageError> {
        self.mutate(|t| {
            t.emails.insert(email.id, email.clone());
            Ok(())
        })
        .await
    }

    async fn list_emails_for_contact(
        &self,
        contact_id: ContactId,
    ) -> Result<Vec<EmailActivity>, StorageError> {
        Ok(self
            .read(|t| {
                let mut emails: Vec<_> = t
                    .emails
                    .values()
                    .filter(|e| e.contact_id == contact_id)
                    .cloned()
                    .collect();
                emails.sort_by(|a, b| (a.occurred_at, a.id).cmp(&(b.occurred_at, b.id)));
                emails
            })
            .await)
    }
}

// ============================================================================
// Audit
// ============================================================================

#[async_trait]
impl AuditLog for MemoryCrmStore {
    async fn record(&self, entry: AuditEntry) -> Result<AuditEntryId, StorageError> {
        self.mutate(move |t| {
            let id = entry.id;
            t.audit.push(entry);
            Ok(id)
        })
        .await
    }

    async fn list_for_subjects(
        &self,
        subjects: &[Subject],
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StorageError> {
        Ok(self
            .read(|t| {
                let mut entries: Vec<_> = t
                    .audit
                    .iter()
                    .filter(|e| subjects.contains(&e.subject) && range.contains(e.created_at))
                    .cloned()
                    .collect();
                // Stable: entries sharing a timestamp keep append order
                entries.sort_by_key(|e| e.created_at);
                entries
            })
            .await)
    }

    async fn prune_older_than(&self, cutoff: Timestamp) -> Result<usize, StorageError> {
        let stale = self
            .read(|t| t.audit.iter().filter(|e| e.created_at < cutoff).count())
            .await;
        if stale == 0 {
            return Ok(0);
        }

        self.mutate(|t| {
            let before = t.audit.len();
            t.audit.retain(|e| e.created_at >= cutoff);
            Ok(before - t.audit.len())
        })
        .await
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
