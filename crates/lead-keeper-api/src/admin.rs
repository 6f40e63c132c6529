//! Administrative endpoints
//!
//! Receipt inspection and replay, the failure ledger, audit retention and the
//! notification outbox.

use crate::auth::AuthenticatedActor;
use crate::crm::json_body;
use crate::errors::ApiError;
use crate::responses::{
    FailureSummary, LimitParams, PruneRequest, PruneResponse, ReceiptListParams,
    ReceiptListResponse, ReceiptSummary, ReplayResponse,
};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use lead_keeper_core::storage::ReceiptFilter;
use lead_keeper_core::{
    Capability, FailureId, Notification, ReceiptId, ReceiptStatus, Timestamp, WebhookFailureRecord,
    WebhookReceipt,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/receipts", get(list_receipts))
        .route("/admin/receipts/{id}", get(get_receipt))
        .route("/admin/receipts/{id}/replay", post(replay_receipt))
        .route("/admin/failures", get(list_failures))
        .route("/admin/failures/{id}", get(get_failure))
        .route("/admin/audit/prune", post(prune_audit))
        .route("/admin/notifications", get(list_notifications))
}

#[instrument(skip(state, actor))]
async fn list_receipts(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(params): Query<ReceiptListParams>,
) -> Result<Json<ReceiptListResponse>, ApiError> {
    actor.require(Capability::AdministerWebhooks)?;
    let status = params
        .status
        .as_deref()
        .map(ReceiptStatus::from_str)
        .transpose()?;

    let receipts = state
        .services
        .receipts
        .list(ReceiptFilter {
            status,
            limit: params.limit,
        })
        .await?;
    let receipts: Vec<ReceiptSummary> = receipts.iter().map(ReceiptSummary::from).collect();

    Ok(Json(ReceiptListResponse {
        total: receipts.len(),
        receipts,
    }))
}

#[instrument(skip(state, actor))]
async fn get_receipt(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<WebhookReceipt>, ApiError> {
    actor.require(Capability::AdministerWebhooks)?;
    let id = ReceiptId::from_str(&id)?;
    state
        .services
        .receipts
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Receipt not found: {}", id)))
}

/// Reset the receipt's retry budget and queue it for immediate processing
#[instrument(skip(state, actor))]
async fn replay_receipt(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ReplayResponse>), ApiError> {
    let id = ReceiptId::from_str(&id)?;
    let receipt = state.services.ingestion.replay(&actor, id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ReplayResponse {
            receipt_id: receipt.id,
            status: receipt.status,
            message: "Receipt queued for processing".to_string(),
        }),
    ))
}

#[instrument(skip(state, actor))]
async fn list_failures(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<FailureSummary>>, ApiError> {
    actor.require(Capability::AdministerWebhooks)?;
    let failures = state.services.failures.list_failures(params.limit).await?;

    Ok(Json(
        failures
            .into_iter()
            .map(|f| FailureSummary {
                id: f.id,
                receipt_id: f.receipt_id,
                event_type: f.event_type,
                attempts: f.attempts,
                error_message: f.error_message,
                final_failed_at: f.final_failed_at,
            })
            .collect(),
    ))
}

#[instrument(skip(state, actor))]
async fn get_failure(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<WebhookFailureRecord>, ApiError> {
    actor.require(Capability::AdministerWebhooks)?;
    let id = FailureId::from_str(&id)?;
    state
        .services
        .failures
        .get_failure(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Failure record not found: {}", id)))
}

/// Remove audit entries older than the given number of days
#[instrument(skip(state, actor, body))]
async fn prune_audit(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    body: Result<Json<PruneRequest>, JsonRejection>,
) -> Result<Json<PruneResponse>, ApiError> {
    actor.require(Capability::ViewAudit)?;
    actor.require(Capability::AdministerWebhooks)?;
    let request = json_body(body)?;

    let cutoff = retention_cutoff(Timestamp::now(), request.older_than_days);
    let removed = state.services.audit.prune_older_than(cutoff).await?;
    info!(actor = %actor, removed, cutoff = %cutoff, "Audit entries pruned");

    Ok(Json(PruneResponse { removed, cutoff }))
}

/// Most recent notifications, oldest first
#[instrument(skip(state, actor))]
async fn list_notifications(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    actor.require(Capability::ViewAudit)?;
    let mut notifications = state.services.outbox.notifications().await;
    if let Some(limit) = params.limit {
        let skip = notifications.len().saturating_sub(limit);
        notifications.drain(..skip);
    }
    Ok(Json(notifications))
}

/// Instant before which entries older than `days` were created
pub fn retention_cutoff(now: Timestamp, days: u32) -> Timestamp {
    now.subtract_duration(Duration::from_secs(u64::from(days) * SECONDS_PER_DAY))
}

#[cfg(test)]
#[path = "admin_tests.rs"]
mod tests;
