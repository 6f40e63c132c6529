//! # Contact Timeline
//!
//! Merges four activity sources for one contact into a single newest-first
//! feed:
//!
//! | type     | source                                             |
//! |----------|----------------------------------------------------|
//! | `task`   | the contact's tasks (created, completed)           |
//! | `deal`   | audit entries of deals attached to the contact     |
//! | `system` | audit entries whose subject is the contact itself  |
//! | `email`  | logged emails                                      |
//!
//! Pages are addressed with an opaque cursor: the hex encoding of
//! `<millis>:<entry id>` for the last entry returned. The next page starts
//! strictly after that position.

use crate::activity::{EmailActivity, Task};
use crate::audit::{AuditEntry, AuditLog, Subject, TimeRange};
use crate::authz::{Actor, AuthorizationError, Capability};
use crate::storage::{ActivityStore, ContactStore, DealStore, StorageError};
use crate::{ContactId, DealId, Timestamp, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Page size when the caller gives none
pub const DEFAULT_LIMIT: usize = 25;

/// Largest page a caller may request
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEntryType {
    Task,
    Deal,
    System,
    Email,
}

impl TimelineEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Deal => "deal",
            Self::System => "system",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for TimelineEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimelineEntryType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "deal" => Ok(Self::Deal),
            "system" => Ok(Self::System),
            "email" => Ok(Self::Email),
            other => Err(ValidationError::InvalidFormat {
                field: "types".to_string(),
                message: format!("unknown timeline type '{}'", other),
            }),
        }
    }
}

/// One normalized timeline item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Stable identifier, unique across sources
    pub id: String,
    pub entry_type: TimelineEntryType,
    pub subtype: String,
    pub timestamp: Timestamp,
    pub actor: Option<UserId>,
    pub title: String,
    pub summary: Option<String>,
    pub link: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl TimelineEntry {
    fn sort_key(&self) -> (i64, &str) {
        (self.timestamp.timestamp_millis(), self.id.as_str())
    }
}

/// Timeline request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineQuery {
    pub contact_id: ContactId,
    /// Empty means every type
    pub types: BTreeSet<TimelineEntryType>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl TimelineQuery {
    /// Query for every entry of the contact, first page, default size
    pub fn for_contact(contact_id: ContactId) -> Self {
        Self {
            contact_id,
            types: BTreeSet::new(),
            from: None,
            to: None,
            cursor: None,
            limit: None,
        }
    }

    fn wants(&self, entry_type: TimelineEntryType) -> bool {
        self.types.is_empty() || self.types.contains(&entry_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePage {
    pub entries: Vec<TimelineEntry>,
    /// Present when more entries follow
    pub next_cursor: Option<String>,
}

/// Effective page size for a requested limit
pub fn effective_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Position of an entry in the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub millis: i64,
    pub id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        hex::encode(format!("{}:{}", self.millis, self.id))
    }

    pub fn decode(value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidFormat {
            field: "cursor".to_string(),
            message: "cursor is not a valid timeline position".to_string(),
        };

        let bytes = hex::decode(value.trim()).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (millis, id) = text.split_once(':').ok_or_else(invalid)?;
        let millis = millis.parse::<i64>().map_err(|_| invalid())?;
        if id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            millis,
            id: id.to_string(),
        })
    }

    fn of(entry: &TimelineEntry) -> Self {
        Self {
            millis: entry.timestamp.timestamp_millis(),
            id: entry.id.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Builds contact timelines from the stores
pub struct TimelineService {
    contacts: Arc<dyn ContactStore>,
    deals: Arc<dyn DealStore>,
    activities: Arc<dyn ActivityStore>,
    audit: Arc<dyn AuditLog>,
}

impl TimelineService {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        deals: Arc<dyn DealStore>,
        activities: Arc<dyn ActivityStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            contacts,
            deals,
            activities,
            audit,
        }
    }

    /// One page of the contact's timeline, newest first
    #[instrument(skip(self, actor, query), fields(contact_id = %query.contact_id))]
    pub async fn query(&self, actor: &Actor, query: TimelineQuery) -> Result<TimelinePage, TimelineError> {
        actor.require(Capability::ViewContacts)?;
        let limit = effective_limit(query.limit);
        let after = query.cursor.as_deref().map(Cursor::decode).transpose()?;

        if self.contacts.get_contact(query.contact_id).await?.is_none() {
            return Err(TimelineError::ContactNotFound(query.contact_id));
        }

        let range = TimeRange {
            from: query.from,
            to: query.to,
        };
        let mut entries = Vec::new();

        if query.wants(TimelineEntryType::Task) {
            let tasks = self.activities.list_tasks_for_contact(query.contact_id).await?;
            entries.extend(tasks.iter().flat_map(task_entries));
        }

        if query.wants(TimelineEntryType::Deal) {
            let deals = self
                .deals
                .list_deals_for_contact(query.contact_id, true)
                .await?;
            let titles: BTreeMap<String, String> = deals
                .iter()
                .map(|d| (d.id.to_string(), d.title.clone()))
                .collect();
            let subjects: Vec<Subject> = deals.iter().map(|d| Subject::deal(d.id)).collect();
            if !subjects.is_empty() {
                let audit = self.audit.list_for_subjects(&subjects, range).await?;
                entries.extend(audit.iter().map(|entry| {
                    audit_entry(
                        entry,
                        TimelineEntryType::Deal,
                        titles.get(&entry.subject.id).map(String::as_str),
                    )
                }));
            }
        }

        if query.wants(TimelineEntryType::System) {
            let audit = self
                .audit
                .list_for_subjects(&[Subject::contact(query.contact_id)], range)
                .await?;
            entries.extend(
                audit
                    .iter()
                    .map(|entry| audit_entry(entry, TimelineEntryType::System, None)),
            );
        }

        if query.wants(TimelineEntryType::Email) {
            let emails = self
                .activities
                .list_emails_for_contact(query.contact_id)
                .await?;
            entries.extend(emails.iter().map(email_entry));
        }

        entries.retain(|e| range.contains(e.timestamp));
        let page = paginate(entries, after.as_ref(), limit);
        debug!(
            returned = page.entries.len(),
            has_more = page.next_cursor.is_some(),
            "Timeline page built"
        );
        Ok(page)
    }
}

/// Sort newest first and cut the page following `after`
pub fn paginate(mut entries: Vec<TimelineEntry>, after: Option<&Cursor>, limit: usize) -> TimelinePage {
    entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

    let mut remaining: Vec<TimelineEntry> = match after {
        Some(cursor) => entries
            .into_iter()
            .filter(|e| e.sort_key() < (cursor.millis, cursor.id.as_str()))
            .collect(),
        None => entries,
    };

    let has_more = remaining.len() > limit;
    remaining.truncate(limit);
    let next_cursor = if has_more {
        remaining.last().map(|e| Cursor::of(e).encode())
    } else {
        None
    };

    TimelinePage {
        entries: remaining,
        next_cursor,
    }
}

fn task_entries(task: &Task) -> Vec<TimelineEntry> {
    let link = Some(format!("/api/tasks/{}", task.id));
    let mut entries = vec![TimelineEntry {
        id: format!("task:{}:created", task.id),
        entry_type: TimelineEntryType::Task,
        subtype: "created".to_string(),
        timestamp: task.created_at,
        actor: task.created_by,
        title: format!("Task created: {}", task.title),
        summary: task.description.clone(),
        link: link.clone(),
        metadata: Some(serde_json::json!({
            "status": task.status,
            "due_at": task.due_at,
            "deal_id": task.deal_id,
        })),
    }];

    if let Some(completed_at) = task.completed_at {
        entries.push(TimelineEntry {
            id: format!("task:{}:completed", task.id),
            entry_type: TimelineEntryType::Task,
            subtype: "completed".to_string(),
            timestamp: completed_at,
            actor: task.assignee,
            title: format!("Task completed: {}", task.title),
            summary: None,
            link,
            metadata: None,
        });
    }
    entries
}

fn email_entry(email: &EmailActivity) -> TimelineEntry {
    TimelineEntry {
        id: format!("email:{}", email.id),
        entry_type: TimelineEntryType::Email,
        subtype: email.direction.as_str().to_string(),
        timestamp: email.occurred_at,
        actor: email.logged_by,
        title: email.subject.clone(),
        summary: email.snippet.clone(),
        link: None,
        metadata: Some(serde_json::json!({
            "from": email.from_address,
            "to": email.to_address,
        })),
    }
}

fn audit_entry(entry: &AuditEntry, entry_type: TimelineEntryType, deal_title: Option<&str>) -> TimelineEntry {
    let subtype = entry
        .action
        .split_once('.')
        .map_or(entry.action.as_str(), |(_, rest)| rest)
        .to_string();
    let text = |key: &str| {
        entry
            .properties
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let deal_label = deal_title.map_or_else(|| "Deal".to_string(), |t| format!("Deal \"{}\"", t));

    let (title, summary) = match entry.action.as_str() {
        "deal.created" => (format!("{} created", deal_label), None),
        "deal.stage_changed" => (
            format!(
                "{} moved from {} to {}",
                deal_label,
                text("from").unwrap_or_default(),
                text("to").unwrap_or_default()
            ),
            None,
        ),
        "deal.won" => (format!("{} won", deal_label), None),
        "deal.lost" => (format!("{} lost", deal_label), text("reason")),
        "deal.assigned" => (format!("{} reassigned", deal_label), None),
        "deal.deleted" => (format!("{} deleted", deal_label), None),
        "deal.restored" => (format!("{} restored", deal_label), None),
        "contact.created" if entry.properties.contains_key("receipt_id") => (
            "Contact created from inbound lead".to_string(),
            text("source"),
        ),
        "contact.created" => ("Contact created".to_string(), None),
        "contact.updated" => ("Contact updated".to_string(), changed_fields(entry)),
        "contact.deleted" => ("Contact deleted".to_string(), None),
        "contact.restored" => ("Contact restored".to_string(), None),
        other => (other.to_string(), None),
    };

    let link = match entry_type {
        TimelineEntryType::Deal => entry
            .subject
            .id
            .parse::<DealId>()
            .ok()
            .map(|id| format!("/api/deals/{}", id)),
        _ => None,
    };

    TimelineEntry {
        id: format!("audit:{}", entry.id),
        entry_type,
        subtype,
        timestamp: entry.created_at,
        actor: entry.actor,
        title,
        summary,
        link,
        metadata: Some(serde_json::Value::Object(entry.properties.clone())),
    }
}

fn changed_fields(entry: &AuditEntry) -> Option<String> {
    let fields: Vec<&str> = entry
        .properties
        .get("changed_fields")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    if fields.is_empty() {
        None
    } else {
        Some(format!("Changed: {}", fields.join(", ")))
    }
}

#[cfg(test)]
#[path = "timeline_tests.rs"]
mod tests;
