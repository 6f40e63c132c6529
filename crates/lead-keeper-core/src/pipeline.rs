//! # Lead Ingestion Pipeline
//!
//! Two halves:
//!
//! - [`IngestionService`] runs at the HTTP boundary. It persists a receipt
//!   keyed by idempotency key and queues it for processing.
//! - [`WebhookPipeline`] runs in the workers. It turns one receipt into a
//!   created or updated contact.
//!
//! ## Processing an attempt
//!
//! 1. Claim the receipt (`pending`/`failed` → `processing`). This is the
//!    per-receipt exclusivity guard; a receipt already processing or
//!    processed is left alone.
//! 2. Normalize the payload and commit the lead: match by email, create or
//!    merge, and write the audit entry, all in one store operation.
//! 3. Mark the receipt `processed` and publish the contact event.
//!
//! A failed attempt marks the receipt `failed`. While the retry budget
//! lasts the caller gets [`PipelineError::AttemptFailed`] with the delay
//! before the next attempt. Once exhausted, exactly one
//! [`WebhookFailureRecord`] is written and the outcome is
//! [`PipelineOutcome::Exhausted`]; nothing more is retried.
//!
//! An attempt whose result was never recorded leaves the receipt
//! `processing`. [`WebhookPipeline::settle_interrupted`] charges it as a
//! failed attempt so the receipt always ends processed or exhausted.

use crate::audit::{AuditEntry, Subject};
use crate::authz::{Actor, AuthorizationError, Capability};
use crate::contact::{resolve, source_tag, Contact, ContactField, LeadResolution};
use crate::events::{DomainEvent, EventDispatcher, EventPayload};
use crate::failure::{FailureReason, WebhookFailureRecord};
use crate::normalizer::{normalize, NormalizationError, NormalizedLead};
use crate::queue::ReceiptQueue;
use crate::receipt::{ReceiptStatus, WebhookReceipt};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::storage::{
    ClaimOutcome, ContactStore, FailureStore, InsertOutcome, LeadCommit, ReceiptFilter,
    ReceiptStore, StorageError,
};
use crate::{ContactId, FailureId, IdempotencyKey, ReceiptId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Event type recorded when the sender does not name one
pub const DEFAULT_EVENT_TYPE: &str = "lead.submitted";

/// Tries per receipt status write before the attempt is left to be settled
pub const STATUS_WRITE_ATTEMPTS: u32 = 3;

/// Pause before the first status write retry; doubles each time
pub const STATUS_WRITE_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// Ingestion
// ============================================================================

/// An inbound webhook call as seen at the boundary
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSubmission {
    pub idempotency_key: IdempotencyKey,
    /// Origin of the webhook, e.g. `website_form`
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Header snapshot, credentials already removed
    pub headers: BTreeMap<String, String>,
}

/// Result of accepting a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    pub receipt_id: ReceiptId,
    pub status: ReceiptStatus,
    /// The idempotency key was already known
    pub duplicate: bool,
}

/// Persists inbound webhooks and queues them
pub struct IngestionService {
    receipts: Arc<dyn ReceiptStore>,
    queue: Arc<dyn ReceiptQueue>,
}

impl IngestionService {
    pub fn new(receipts: Arc<dyn ReceiptStore>, queue: Arc<dyn ReceiptQueue>) -> Self {
        Self { receipts, queue }
    }

    /// Store the submission and queue it for processing
    ///
    /// A repeated idempotency key returns the original receipt and queues
    /// nothing new.
    #[instrument(skip(self, submission), fields(
        idempotency_key = %submission.idempotency_key,
        source = %submission.source,
    ))]
    pub async fn accept(&self, submission: WebhookSubmission) -> Result<Acceptance, StorageError> {
        let now = Timestamp::now();
        let receipt = WebhookReceipt::new(
            submission.idempotency_key,
            submission.event_type,
            submission.source,
            submission.payload,
            submission.headers,
            now,
        );

        match self.receipts.insert_if_absent(receipt).await? {
            InsertOutcome::Inserted(receipt) => {
                self.queue.enqueue(receipt.id, now).await?;
                info!(receipt_id = %receipt.id, "Webhook accepted");
                Ok(Acceptance {
                    receipt_id: receipt.id,
                    status: receipt.status,
                    duplicate: false,
                })
            }
            InsertOutcome::Duplicate(existing) => {
                // A pending receipt may have missed its enqueue; the queue ignores repeats
                if existing.status == ReceiptStatus::Pending {
                    self.queue.enqueue(existing.id, now).await?;
                }
                info!(receipt_id = %existing.id, status = %existing.status, "Duplicate webhook");
                Ok(Acceptance {
                    receipt_id: existing.id,
                    status: existing.status,
                    duplicate: true,
                })
            }
        }
    }

    /// Operator replay: reset the receipt's retry budget and queue it now
    #[instrument(skip(self, actor), fields(receipt_id = %receipt_id))]
    pub async fn replay(&self, actor: &Actor, receipt_id: ReceiptId) -> Result<WebhookReceipt, PipelineError> {
        actor.require(Capability::AdministerWebhooks)?;

        let mut receipt = self
            .receipts
            .get(receipt_id)
            .await?
            .ok_or(PipelineError::ReceiptNotFound(receipt_id))?;
        if receipt.status == ReceiptStatus::Processing {
            return Err(PipelineError::InFlight(receipt_id));
        }

        receipt.reset();
        self.receipts.update(&receipt).await?;
        self.queue.enqueue(receipt.id, Timestamp::now()).await?;
        info!(actor = %actor, "Receipt replayed");
        Ok(receipt)
    }

    /// Queue every receipt left unfinished by a previous run
    ///
    /// Receipts interrupted mid-attempt are settled first: the attempt stays
    /// charged and follows the normal retry or exhaustion path. Then every
    /// pending receipt and every failed one with budget left is queued.
    /// Returns how many receipts were queued.
    #[instrument(skip(self, pipeline))]
    pub async fn recover(&self, pipeline: &WebhookPipeline) -> Result<usize, StorageError> {
        let interrupted = self
            .receipts
            .list(ReceiptFilter {
                status: Some(ReceiptStatus::Processing),
                limit: None,
            })
            .await?;
        for receipt in interrupted {
            match pipeline.settle_interrupted(receipt.id).await {
                Ok(outcome) => debug!(receipt_id = %receipt.id, outcome = outcome.label(), "Interrupted receipt settled"),
                Err(PipelineError::AttemptFailed { .. }) => {}
                Err(PipelineError::Storage(e)) => return Err(e),
                Err(e) => warn!(receipt_id = %receipt.id, error = %e, "Could not settle interrupted receipt"),
            }
        }

        let now = Timestamp::now();
        let retry = pipeline.retry_policy();
        let mut queued = 0;
        for status in [ReceiptStatus::Pending, ReceiptStatus::Failed] {
            let receipts = self
                .receipts
                .list(ReceiptFilter {
                    status: Some(status),
                    limit: None,
                })
                .await?;

            for receipt in receipts {
                if status == ReceiptStatus::Failed && !retry.can_retry(receipt.attempts) {
                    continue;
                }
                let available_at = receipt.next_attempt_at.unwrap_or(now);
                if self.queue.enqueue(receipt.id, available_at).await? {
                    queued += 1;
                }
            }
        }

        if queued > 0 {
            info!(queued, "Recovered unfinished receipts");
        }
        Ok(queued)
    }
}

// ============================================================================
// Processing
// ============================================================================

/// Terminal result of one `process` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The lead landed on a contact
    Processed {
        contact_id: ContactId,
        created: bool,
        changed_fields: BTreeSet<ContactField>,
    },
    /// Nothing to do: processing already succeeded
    AlreadyProcessed,
    /// Nothing to do: another worker holds the receipt
    InFlight,
    /// The final attempt failed and a failure record was written
    Exhausted { failure_id: FailureId },
    /// Nothing to do: the retry budget was used up earlier
    AlreadyExhausted,
}

impl PipelineOutcome {
    /// Short label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed { created: true, .. } => "created",
            Self::Processed { created: false, .. } => "updated",
            Self::AlreadyProcessed => "already_processed",
            Self::InFlight => "in_flight",
            Self::Exhausted { .. } => "exhausted",
            Self::AlreadyExhausted => "already_exhausted",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Receipt not found: {0}")]
    ReceiptNotFound(ReceiptId),

    #[error("Receipt {0} is being processed")]
    InFlight(ReceiptId),

    #[error("Attempt {attempts} for receipt {receipt_id} failed, retry in {}s: {message}", retry_after.as_secs())]
    AttemptFailed {
        receipt_id: ReceiptId,
        attempts: u32,
        retry_after: Duration,
        message: String,
    },

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Why a single attempt failed
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("Invalid lead payload")]
    Normalization(#[from] NormalizationError),

    #[error("Failed to store lead")]
    Storage(#[from] StorageError),

    #[error("Processing attempt was interrupted")]
    Interrupted,
}

impl AttemptError {
    fn reason(&self) -> FailureReason {
        match self {
            Self::Normalization(_) => FailureReason::InvalidPayload,
            Self::Storage(_) => FailureReason::Storage,
            Self::Interrupted => FailureReason::Processing,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Normalization(e) => format!("{}: {}", self, e),
            Self::Storage(e) => format!("{}: {}", self, e),
            Self::Interrupted => self.to_string(),
        }
    }
}

/// Turns receipts into contacts
pub struct WebhookPipeline {
    receipts: Arc<dyn ReceiptStore>,
    contacts: Arc<dyn ContactStore>,
    failures: Arc<dyn FailureStore>,
    events: Arc<EventDispatcher>,
    retry: RetryPolicy,
}

impl WebhookPipeline {
    pub fn new(
        receipts: Arc<dyn ReceiptStore>,
        contacts: Arc<dyn ContactStore>,
        failures: Arc<dyn FailureStore>,
        events: Arc<EventDispatcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            receipts,
            contacts,
            failures,
            events,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one processing attempt for the receipt
    #[instrument(skip(self), fields(receipt_id = %receipt_id))]
    pub async fn process(&self, receipt_id: ReceiptId) -> Result<PipelineOutcome, PipelineError> {
        let current = self
            .receipts
            .get(receipt_id)
            .await?
            .ok_or(PipelineError::ReceiptNotFound(receipt_id))?;
        if current.status == ReceiptStatus::Failed && !self.retry.can_retry(current.attempts) {
            debug!(attempts = current.attempts, "Retry budget already used up");
            return Ok(PipelineOutcome::AlreadyExhausted);
        }

        let mut receipt = match self.receipts.claim(receipt_id).await {
            Ok(ClaimOutcome::Claimed(receipt)) => receipt,
            Ok(ClaimOutcome::AlreadyProcessed(_)) => return Ok(PipelineOutcome::AlreadyProcessed),
            Ok(ClaimOutcome::InFlight(_)) => return Ok(PipelineOutcome::InFlight),
            Err(StorageError::NotFound { .. }) => return Err(PipelineError::ReceiptNotFound(receipt_id)),
            Err(e) => return Err(e.into()),
        };
        debug!(attempt = receipt.attempts, "Receipt claimed");

        let now = Timestamp::now();
        match self.attempt(&receipt, now).await {
            Ok(resolution) => self.complete(&mut receipt, resolution, now).await,
            Err(e) => self.fail(&mut receipt, e, now).await,
        }
    }

    /// Close out an attempt that never recorded its result
    ///
    /// A receipt still `processing` with nobody working on it, after a crash
    /// or a failed status write, has its attempt marked failed. The attempt
    /// stays charged, so the usual retry or exhaustion path applies. A
    /// receipt in any other state is processed normally.
    #[instrument(skip(self), fields(receipt_id = %receipt_id))]
    pub async fn settle_interrupted(&self, receipt_id: ReceiptId) -> Result<PipelineOutcome, PipelineError> {
        let mut receipt = self
            .receipts
            .get(receipt_id)
            .await?
            .ok_or(PipelineError::ReceiptNotFound(receipt_id))?;
        if receipt.status != ReceiptStatus::Processing {
            return self.process(receipt_id).await;
        }

        warn!(attempt = receipt.attempts, "Settling interrupted attempt");
        self.fail(&mut receipt, AttemptError::Interrupted, Timestamp::now())
            .await
    }

    async fn attempt(&self, receipt: &WebhookReceipt, now: Timestamp) -> Result<LeadResolution, AttemptError> {
        let lead = normalize(&receipt.payload)?;
        let email = lead.email.clone();
        let tag = source_tag(&receipt.source);
        let receipt_id = receipt.id;
        let source = receipt.source.clone();

        let plan = move |existing: Option<&Contact>| {
            let resolution = resolve(&lead, existing, &tag, now);
            let audit = lead_audit_entry(&resolution, &lead, receipt_id, &source, now);
            LeadCommit { resolution, audit }
        };

        Ok(self.contacts.commit_lead(email.as_deref(), &plan).await?)
    }

    async fn complete(
        &self,
        receipt: &mut WebhookReceipt,
        resolution: LeadResolution,
        now: Timestamp,
    ) -> Result<PipelineOutcome, PipelineError> {
        receipt
            .mark_processed(now)
            .map_err(|e| StorageError::InvalidTransition {
                message: e.to_string(),
            })?;
        self.write_status(receipt).await?;

        let contact_id = resolution.contact().id;
        let changed_fields = resolution.changed_fields();
        let created = resolution.is_created();
        let payload = if created {
            EventPayload::ContactCreated {
                receipt_id: Some(receipt.id),
            }
        } else {
            EventPayload::ContactUpdated {
                changed_fields: changed_fields.clone(),
                receipt_id: Some(receipt.id),
            }
        };
        self.events
            .publish(&DomainEvent::new(
                &Actor::system(),
                Subject::contact(contact_id),
                payload,
                now,
            ))
            .await;

        info!(
            contact_id = %contact_id,
            created,
            changed = changed_fields.len(),
            attempt = receipt.attempts,
            "Lead processed"
        );
        Ok(PipelineOutcome::Processed {
            contact_id,
            created,
            changed_fields,
        })
    }

    async fn fail(
        &self,
        receipt: &mut WebhookReceipt,
        error: AttemptError,
        now: Timestamp,
    ) -> Result<PipelineOutcome, PipelineError> {
        let message = error.message();
        receipt
            .mark_failed(message.clone(), now)
            .map_err(|e| StorageError::InvalidTransition {
                message: e.to_string(),
            })?;

        match self.retry.decide(receipt.attempts) {
            RetryDecision::RetryAfter(delay) => {
                receipt.next_attempt_at = Some(now.add_duration(delay));
                self.write_status(receipt).await?;
                warn!(
                    attempt = receipt.attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %message,
                    "Lead processing failed, will retry"
                );
                Err(PipelineError::AttemptFailed {
                    receipt_id: receipt.id,
                    attempts: receipt.attempts,
                    retry_after: delay,
                    message,
                })
            }
            RetryDecision::Exhausted => {
                self.write_status(receipt).await?;
                let record = WebhookFailureRecord::from_receipt(receipt, &error, error.reason(), now);
                let failure_id = self.failures.record_failure(record).await?;
                error!(
                    attempts = receipt.attempts,
                    failure_id = %failure_id,
                    error = %message,
                    "Lead processing failed permanently"
                );
                Ok(PipelineOutcome::Exhausted { failure_id })
            }
        }
    }

    /// Persist the receipt's new status, retrying transient store errors
    async fn write_status(&self, receipt: &WebhookReceipt) -> Result<(), StorageError> {
        let mut delay = STATUS_WRITE_BACKOFF;
        let mut tries = 1;
        loop {
            match self.receipts.update(receipt).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && tries < STATUS_WRITE_ATTEMPTS => {
                    warn!(status = %receipt.status, tries, error = %e, "Receipt status write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    tries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn lead_audit_entry(
    resolution: &LeadResolution,
    lead: &NormalizedLead,
    receipt_id: ReceiptId,
    source: &str,
    now: Timestamp,
) -> AuditEntry {
    let mut properties = serde_json::Map::new();
    properties.insert("receipt_id".to_string(), receipt_id.to_string().into());
    properties.insert("source".to_string(), source.into());
    properties.insert("created".to_string(), resolution.is_created().into());
    if !resolution.is_created() {
        let changed: Vec<serde_json::Value> = resolution
            .changed_fields()
            .iter()
            .map(|f| f.as_str().into())
            .collect();
        properties.insert("changed_fields".to_string(), changed.into());
    }
    if !lead.attribution.is_empty() {
        let attribution: serde_json::Map<String, serde_json::Value> = lead
            .attribution
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into()))
            .collect();
        properties.insert("attribution".to_string(), attribution.into());
    }

    let action = if resolution.is_created() {
        "contact.created"
    } else {
        "contact.updated"
    };
    AuditEntry::new(
        None,
        Subject::contact(resolution.contact().id),
        action,
        properties,
        now,
    )
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
