//! # Webhook Receipts
//!
//! Durable record of every inbound webhook call and the status machine the
//! processing pipeline drives it through:
//!
//! ```text
//! pending ──► processing ──► processed
//!                 │  ▲
//!                 ▼  │
//!               failed
//! ```
//!
//! `processed` is terminal for the pipeline. Only an explicit operator reset
//! returns a receipt to `pending`.

use crate::{IdempotencyKey, ReceiptId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Processing status of a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ReceiptStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReceiptStatus {
    type Err = crate::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(crate::ParseError::InvalidFormat {
                expected: "pending, processing, processed, or failed".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Rejected receipt status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Receipt cannot move from {from} to {to}")]
pub struct InvalidReceiptTransition {
    pub from: ReceiptStatus,
    pub to: ReceiptStatus,
}

/// Persisted record of one inbound webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub id: ReceiptId,
    pub idempotency_key: IdempotencyKey,
    pub event_type: String,
    /// Origin of the webhook, e.g. `website_form`
    pub source: String,
    /// Raw payload exactly as received
    pub payload: serde_json::Value,
    /// Request headers at receipt time, credentials removed
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub status: ReceiptStatus,
    /// Number of processing attempts started
    pub attempts: u32,
    pub received_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub first_failed_at: Option<Timestamp>,
    /// When the scheduler intends to retry a failed receipt
    pub next_attempt_at: Option<Timestamp>,
}

impl WebhookReceipt {
    /// Create a new pending receipt
    pub fn new(
        idempotency_key: IdempotencyKey,
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
        headers: BTreeMap<String, String>,
        received_at: Timestamp,
    ) -> Self {
        Self {
            id: ReceiptId::new(),
            idempotency_key,
            event_type: event_type.into(),
            source: source.into(),
            payload,
            headers,
            status: ReceiptStatus::Pending,
            attempts: 0,
            received_at,
            processed_at: None,
            last_error: None,
            first_failed_at: None,
            next_attempt_at: None,
        }
    }

    /// Start a processing attempt
    ///
    /// Allowed from `pending` and `failed`. Increments the attempt counter so
    /// an attempt that never finishes stays visible.
    pub fn begin_attempt(&mut self) -> Result<(), InvalidReceiptTransition> {
        match self.status {
            ReceiptStatus::Pending | ReceiptStatus::Failed => {
                self.status = ReceiptStatus::Processing;
                self.attempts += 1;
                self.next_attempt_at = None;
                Ok(())
            }
            from => Err(InvalidReceiptTransition {
                from,
                to: ReceiptStatus::Processing,
            }),
        }
    }

    /// Finish the current attempt successfully
    pub fn mark_processed(&mut self, now: Timestamp) -> Result<(), InvalidReceiptTransition> {
        self.require_processing(ReceiptStatus::Processed)?;
        self.status = ReceiptStatus::Processed;
        self.processed_at = Some(now);
        self.last_error = None;
        Ok(())
    }

    /// Finish the current attempt with an error
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), InvalidReceiptTransition> {
        self.require_processing(ReceiptStatus::Failed)?;
        self.status = ReceiptStatus::Failed;
        self.last_error = Some(error.into());
        self.first_failed_at.get_or_insert(now);
        Ok(())
    }

    /// Operator reset for replay: back to `pending` with a fresh retry budget
    pub fn reset(&mut self) {
        self.status = ReceiptStatus::Pending;
        self.attempts = 0;
        self.processed_at = None;
        self.last_error = None;
        self.first_failed_at = None;
        self.next_attempt_at = None;
    }

    /// Whether processing finished successfully
    pub fn is_processed(&self) -> bool {
        self.status == ReceiptStatus::Processed
    }

    fn require_processing(&self, to: ReceiptStatus) -> Result<(), InvalidReceiptTransition> {
        if self.status == ReceiptStatus::Processing {
            Ok(())
        } else {
            Err(InvalidReceiptTransition {
                from: self.status,
                to,
            })
        }
    }
}

/// Header names never persisted in a receipt snapshot
pub const REDACTED_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    "x-signature-256",
    "x-hub-signature-256",
    "proxy-authorization",
];

/// Build the header snapshot stored on a receipt
pub fn header_snapshot<'a>(
    headers: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_lowercase(), value.to_string()))
        .filter(|(name, _)| !REDACTED_HEADERS.contains(&name.as_str()))
        .collect()
}

#[cfg(test)]
#[path = "receipt_tests.rs"]
mod tests;
