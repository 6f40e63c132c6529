//! # Tasks and Email Activity
//!
//! Follow-up tasks and logged emails attached to a contact. Both feed the
//! contact timeline.

use crate::audit::Subject;
use crate::authz::{Actor, AuthorizationError, Capability};
use crate::events::{DomainEvent, EventDispatcher, EventPayload};
use crate::storage::{ActivityStore, ContactStore, StorageError};
use crate::{ContactId, DealId, EmailId, TaskId, Timestamp, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Maximum length of task titles and email subjects
pub const MAX_TITLE_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A follow-up on a contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub contact_id: ContactId,
    pub deal_id: Option<DealId>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub assignee: Option<UserId>,
    pub created_by: Option<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Task {
    /// Mark an open task as done
    pub fn complete(&mut self, now: Timestamp) -> Result<(), ActivityError> {
        if self.status != TaskStatus::Open {
            return Err(ActivityError::InvalidTransition {
                message: format!("task {} is {}", self.id, self.status),
            });
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailDirection {
    Inbound,
    Outbound,
}

impl EmailDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// An email exchanged with a contact, logged for the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailActivity {
    pub id: EmailId,
    pub contact_id: ContactId,
    pub direction: EmailDirection,
    pub subject: String,
    pub snippet: Option<String>,
    pub from_address: String,
    pub to_address: String,
    pub occurred_at: Timestamp,
    pub logged_by: Option<UserId>,
}

/// Operator input for a new task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deal_id: Option<DealId>,
    #[serde(default)]
    pub due_at: Option<Timestamp>,
    #[serde(default)]
    pub assignee: Option<UserId>,
}

/// Operator input for logging an email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmail {
    pub direction: EmailDirection,
    pub subject: String,
    #[serde(default)]
    pub snippet: Option<String>,
    pub from_address: String,
    pub to_address: String,
    /// Defaults to the time of logging
    #[serde(default)]
    pub occurred_at: Option<Timestamp>,
}

#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition: {message}")]
    InvalidTransition { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Creates and completes tasks, logs emails
pub struct ActivityService {
    contacts: Arc<dyn ContactStore>,
    activities: Arc<dyn ActivityStore>,
    events: Arc<EventDispatcher>,
}

impl ActivityService {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        activities: Arc<dyn ActivityStore>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            contacts,
            activities,
            events,
        }
    }

    #[instrument(skip(self, actor, input), fields(contact_id = %contact_id))]
    pub async fn create_task(
        &self,
        actor: &Actor,
        contact_id: ContactId,
        input: NewTask,
    ) -> Result<Task, ActivityError> {
        actor.require(Capability::ManageTasks)?;
        let title = required_title("title", &input.title)?;
        self.require_live_contact(contact_id).await?;

        let now = Timestamp::now();
        let task = Task {
            id: TaskId::new(),
            contact_id,
            deal_id: input.deal_id,
            title,
            description: input.description.filter(|d| !d.trim().is_empty()),
            status: TaskStatus::Open,
            due_at: input.due_at,
            completed_at: None,
            assignee: input.assignee.or(actor.user_id),
            created_by: actor.user_id,
            created_at: now,
            updated_at: now,
        };
        self.activities.insert_task(&task).await?;

        info!(task_id = %task.id, "Task created");
        self.events
            .publish(&DomainEvent::new(
                actor,
                Subject::task(task.id),
                EventPayload::TaskCreated {
                    contact_id,
                    title: task.title.clone(),
                },
                now,
            ))
            .await;
        Ok(task)
    }

    #[instrument(skip(self, actor), fields(task_id = %task_id))]
    pub async fn complete_task(&self, actor: &Actor, task_id: TaskId) -> Result<Task, ActivityError> {
        actor.require(Capability::ManageTasks)?;

        let mut task = self
            .activities
            .get_task(task_id)
            .await?
            .ok_or_else(|| ActivityError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            })?;

        let now = Timestamp::now();
        task.complete(now)?;
        self.activities.update_task(&task).await?;

        info!("Task completed");
        self.events
            .publish(&DomainEvent::new(
                actor,
                Subject::task(task.id),
                EventPayload::TaskCompleted {
                    contact_id: task.contact_id,
                    title: task.title.clone(),
                },
                now,
            ))
            .await;
        Ok(task)
    }

    #[instrument(skip(self, actor, input), fields(contact_id = %contact_id))]
    pub async fn log_email(
        &self,
        actor: &Actor,
        contact_id: ContactId,
        input: NewEmail,
    ) -> Result<EmailActivity, ActivityError> {
        actor.require(Capability::ManageContacts)?;
        let subject = required_title("subject", &input.subject)?;
        for (field, value) in [("from_address", &input.from_address), ("to_address", &input.to_address)] {
            if value.trim().is_empty() {
                return Err(ValidationError::Required {
                    field: field.to_string(),
                }
                .into());
            }
        }
        self.require_live_contact(contact_id).await?;

        let email = EmailActivity {
            id: EmailId::new(),
            contact_id,
            direction: input.direction,
            subject,
            snippet: input.snippet.filter(|s| !s.trim().is_empty()),
            from_address: input.from_address.trim().to_string(),
            to_address: input.to_address.trim().to_string(),
            occurred_at: input.occurred_at.unwrap_or_else(Timestamp::now),
            logged_by: actor.user_id,
        };
        self.activities.insert_email(&email).await?;

        info!(email_id = %email.id, "Email logged");
        Ok(email)
    }

    async fn require_live_contact(&self, contact_id: ContactId) -> Result<(), ActivityError> {
        match self.contacts.get_contact(contact_id).await? {
            Some(contact) if !contact.is_deleted() => Ok(()),
            _ => Err(ActivityError::NotFound {
                entity: "contact",
                id: contact_id.to_string(),
            }),
        }
    }
}

fn required_title(field: &str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.chars().count() > MAX_TITLE_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max_length: MAX_TITLE_LENGTH,
        });
    }
    Ok(value.to_string())
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
