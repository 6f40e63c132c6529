//! # Webhook Failure Ledger
//!
//! Write-once records of webhooks whose retry budget ran out. Operators read
//! them for diagnostics; nothing in the system ever updates one.

use crate::receipt::WebhookReceipt;
use crate::{FailureId, ReceiptId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which way the failed webhook was travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDirection {
    Inbound,
    Outbound,
}

/// Broad classification of the final error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Payload could not be interpreted as a lead
    InvalidPayload,
    /// Persistence kept failing
    Storage,
    /// Anything else raised while processing
    Processing,
}

/// Diagnostic snapshot of a terminally failed webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookFailureRecord {
    pub id: FailureId,
    pub receipt_id: ReceiptId,
    pub direction: FailureDirection,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
    pub error_message: String,
    /// The error and its chain of sources, one per line
    pub trace: String,
    pub attempts: u32,
    pub first_failed_at: Timestamp,
    pub final_failed_at: Timestamp,
    pub reason: FailureReason,
}

impl WebhookFailureRecord {
    /// Snapshot an inbound receipt after its final failed attempt
    pub fn from_receipt(
        receipt: &WebhookReceipt,
        error: &(dyn std::error::Error + 'static),
        reason: FailureReason,
        now: Timestamp,
    ) -> Self {
        Self {
            id: FailureId::new(),
            receipt_id: receipt.id,
            direction: FailureDirection::Inbound,
            event_type: receipt.event_type.clone(),
            payload: receipt.payload.clone(),
            headers: receipt.headers.clone(),
            error_message: error.to_string(),
            trace: error_trace(error),
            attempts: receipt.attempts,
            first_failed_at: receipt.first_failed_at.unwrap_or(now),
            final_failed_at: now,
            reason,
        }
    }
}

/// Render an error and its `source()` chain
pub fn error_trace(error: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        lines.push(format!("caused by: {}", source));
        current = source.source();
    }
    lines.join("\n")
}
