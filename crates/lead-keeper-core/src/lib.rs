//! # Lead-Keeper Core
//!
//! Core business logic for the Lead-Keeper CRM back office.
//!
//! This crate contains the domain logic for ingesting inbound lead webhooks,
//! deduplicating them into contacts, driving the deal lifecycle, and recording
//! the audit trail that feeds the contact timeline.
//!
//! ## Architecture
//!
//! - Pure rules (normalization, merge policy, deal transitions, retry schedule)
//!   live in plain functions and methods with no I/O
//! - Persistence is abstracted behind the traits in [`storage`]
//! - Services orchestrate authorization, persistence and event publication
//!
//! ## Usage
//!
//! ```rust
//! use lead_keeper_core::{normalizer::normalize, ContactId};
//!
//! let lead = normalize(&serde_json::json!({"email": " A@B.com "})).unwrap();
//! assert_eq!(lead.email.as_deref(), Some("a@b.com"));
//!
//! let contact_id = ContactId::new();
//! assert_eq!(contact_id.to_string().len(), 26);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for lead-keeper operations
pub type LeadKeeperResult<T> = Result<T, LeadKeeperError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Declares a ULID-backed identifier newtype.
///
/// ULIDs sort lexicographically by creation time, which the timeline and the
/// admin listings rely on for stable ordering.
macro_rules! ulid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new unique identifier
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Get the underlying ULID
            pub fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
                    expected: "ULID format".to_string(),
                    actual: s.to_string(),
                })?;
                Ok(Self(ulid))
            }
        }
    };
}

ulid_identifier!(
    /// Identifier of a persisted webhook receipt
    ReceiptId
);
ulid_identifier!(
    /// Identifier of a contact
    ContactId
);
ulid_identifier!(
    /// Identifier of a deal
    DealId
);
ulid_identifier!(
    /// Identifier of a task
    TaskId
);
ulid_identifier!(
    /// Identifier of a logged email
    EmailId
);
ulid_identifier!(
    /// Identifier of an audit entry
    AuditEntryId
);
ulid_identifier!(
    /// Identifier of a terminal webhook failure record
    FailureId
);
ulid_identifier!(
    /// Identifier of a published domain event
    DomainEventId
);

/// Operator identifier for attribution and access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Create new user ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.parse::<u64>().map_err(|_| ParseError::InvalidFormat {
            expected: "positive integer".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self::new(id))
    }
}

/// Caller-supplied token used to deduplicate repeated webhook deliveries
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Maximum accepted key length
    pub const MAX_LENGTH: usize = 255;

    /// Create new idempotency key with validation
    ///
    /// # Validation Rules
    /// - Must be 1-255 characters
    /// - Must contain only printable ASCII without whitespace
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "idempotency_key".to_string(),
            });
        }

        if value.len() > Self::MAX_LENGTH {
            return Err(ValidationError::TooLong {
                field: "idempotency_key".to_string(),
                max_length: Self::MAX_LENGTH,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "idempotency_key".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

// ============================================================================
// Time and Metadata Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing UTC datetime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Build a timestamp from milliseconds since the Unix epoch
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Add duration to timestamp
    pub fn add_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 + chrono_duration)
    }

    /// Subtract duration from timestamp
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

/// Identifier for tracing requests across system boundaries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Security-related failures requiring immediate attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' is below minimum length of {min_length}")]
    TooShort { field: String, min_length: usize },

    #[error("Field '{field}' must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            Self::Required { field }
            | Self::InvalidFormat { field, .. }
            | Self::TooLong { field, .. }
            | Self::TooShort { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::InvalidCharacters { field, .. } => field,
        }
    }
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for lead-keeper operations
#[derive(Debug, thiserror::Error)]
pub enum LeadKeeperError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LeadKeeperError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Internal { .. } => true,
            Self::Validation(_) => false,
            Self::Parse(_) => false,
            Self::Configuration { .. } => false,
        }
    }

    /// Get error category for monitoring and alerting
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Parse(_) => ErrorCategory::Permanent,
            Self::Storage(e) if e.is_transient() => ErrorCategory::Transient,
            Self::Storage(_) => ErrorCategory::Permanent,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Lead payload normalization
pub mod normalizer;

/// Contact model and lead matching/merging
pub mod contact;

/// Webhook receipts and their processing status machine
pub mod receipt;

/// Terminal webhook failure ledger
pub mod failure;

/// Retry budget and backoff schedule
pub mod retry;

/// Deal lifecycle state machine
pub mod deal;

/// Capability-based authorization
pub mod authz;

/// Domain events and the in-process dispatcher
pub mod events;

/// Audit trail entries and the audit log port
pub mod audit;

/// Notification routing for domain events
pub mod notification;

/// Tasks and logged email activity
pub mod activity;

/// Per-contact activity timeline
pub mod timeline;

/// Storage ports shared by services and adapters
pub mod storage;

/// Receipt processing queue
pub mod queue;

/// Webhook signature validation
pub mod signature;

/// Webhook ingestion and the lead processing pipeline
pub mod pipeline;

/// Deal application service
pub mod deal_service;

/// Contact application service
pub mod contact_service;

/// Storage adapters
pub mod adapters;

// Re-export key types for convenience
pub use activity::{ActivityError, ActivityService, EmailActivity, EmailDirection, Task, TaskStatus};
pub use adapters::MemoryCrmStore;
pub use audit::{AuditEntry, AuditLog, AuditSubscriber, Subject, SubjectKind};
pub use authz::{Actor, AuthorizationError, Capability, Role};
pub use contact::{Contact, ContactField, ContactStatus, LeadResolution};
pub use contact_service::{ContactError, ContactExport, ContactService, ExportFormat};
pub use deal::{Amount, Deal, DealError, DealStage, DealStatus};
pub use deal_service::{DealService, DealServiceError};
pub use events::{DomainEvent, EventDispatcher, EventPayload, EventSubscriber};
pub use failure::{FailureDirection, FailureReason, WebhookFailureRecord};
pub use notification::{
    Notification, NotificationRoute, NotificationRouting, NotificationSubscriber, Notifier,
    OutboxNotifier,
};
pub use pipeline::{
    Acceptance, IngestionService, PipelineError, PipelineOutcome, WebhookPipeline,
    WebhookSubmission,
};
pub use queue::{MemoryReceiptQueue, ReceiptJob, ReceiptQueue};
pub use receipt::{ReceiptStatus, WebhookReceipt};
pub use retry::{RetryDecision, RetryPolicy};
pub use signature::{HmacSignatureValidator, SignatureError, SignatureValidator};
pub use storage::StorageError;
pub use timeline::{TimelineEntry, TimelineEntryType, TimelinePage, TimelineQuery, TimelineService};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
