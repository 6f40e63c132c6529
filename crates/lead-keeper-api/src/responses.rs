//! Request bodies, response bodies and query parameters for the API

use lead_keeper_core::{
    Amount, DealStage, FailureId, ReceiptId, ReceiptStatus, Timestamp, UserId, WebhookReceipt,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Response Types
// ============================================================================

/// Webhook accepted for processing
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAcceptedResponse {
    pub receipt_id: ReceiptId,
    pub status: ReceiptStatus,
    pub duplicate: bool,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub checks: BTreeMap<String, HealthCheckResult>,
    pub version: String,
}

/// Readiness check response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

/// Health check result for individual components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Receipt summary for listing; payload and headers omitted
#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub id: ReceiptId,
    pub idempotency_key: String,
    pub event_type: String,
    pub source: String,
    pub status: ReceiptStatus,
    pub attempts: u32,
    pub received_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub next_attempt_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl From<&WebhookReceipt> for ReceiptSummary {
    fn from(receipt: &WebhookReceipt) -> Self {
        Self {
            id: receipt.id,
            idempotency_key: receipt.idempotency_key.to_string(),
            event_type: receipt.event_type.clone(),
            source: receipt.source.clone(),
            status: receipt.status,
            attempts: receipt.attempts,
            received_at: receipt.received_at,
            processed_at: receipt.processed_at,
            next_attempt_at: receipt.next_attempt_at,
            last_error: receipt.last_error.clone(),
        }
    }
}

/// Receipt list response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiptListResponse {
    pub receipts: Vec<ReceiptSummary>,
    pub total: usize,
}

/// Receipt replay response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub receipt_id: ReceiptId,
    pub status: ReceiptStatus,
    pub message: String,
}

/// Failure record summary for listing
#[derive(Debug, Serialize, Deserialize)]
pub struct FailureSummary {
    pub id: FailureId,
    pub receipt_id: ReceiptId,
    pub event_type: String,
    pub attempts: u32,
    pub error_message: String,
    pub final_failed_at: Timestamp,
}

/// Audit prune response
#[derive(Debug, Serialize, Deserialize)]
pub struct PruneResponse {
    pub removed: usize,
    pub cutoff: Timestamp,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub stage: DealStage,
    #[serde(default)]
    pub probability: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WonRequest {
    /// Falls back to the deal amount
    #[serde(default)]
    pub won_amount: Option<Amount>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LostRequest {
    /// Required; an absent reason is reported by the deal's validation
    #[serde(default)]
    pub lost_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub owner_id: UserId,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    /// `json` (default) or `jsonl`
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PruneRequest {
    pub older_than_days: u32,
}

// ============================================================================
// Query Parameter Types
// ============================================================================

/// Parameters for receipt listing
#[derive(Debug, Default, Deserialize)]
pub struct ReceiptListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Parameters for failure and notification listing
#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// Parameters for contact listing
#[derive(Debug, Default, Deserialize)]
pub struct ContactListParams {
    #[serde(default)]
    pub include_deleted: bool,
    pub status: Option<lead_keeper_core::ContactStatus>,
    pub limit: Option<usize>,
}

/// Parameters for the contact timeline
///
/// `types` is a comma-separated list such as `task,deal`.
#[derive(Debug, Default, Deserialize)]
pub struct TimelineParams {
    pub types: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}
