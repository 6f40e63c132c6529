//! Inbound lead webhook endpoint
//!
//! `POST {path_prefix}/{source}` stores the delivery as a receipt and answers
//! `202 Accepted` before any lead processing happens. Processing runs in the
//! background workers.

use crate::config::ServiceConfig;
use crate::errors::ApiError;
use crate::responses::WebhookAcceptedResponse;
use crate::AppState;
use axum::{
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use bytes::Bytes;
use lead_keeper_core::receipt::header_snapshot;
use lead_keeper_core::{IdempotencyKey, WebhookSubmission};
use tracing::{instrument, warn};

/// Header carrying the caller's idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Alternative spelling accepted for the idempotency key
pub const ALT_IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Optional header naming the event type
pub const EVENT_TYPE_HEADER: &str = "x-event-type";

/// HMAC signature header, `sha256=<hex>`
pub const SIGNATURE_HEADER: &str = "x-signature-256";

pub fn routes(config: &ServiceConfig) -> Router<AppState> {
    let path = format!(
        "{}/{{source}}",
        config.webhooks.path_prefix.trim_end_matches('/')
    );
    Router::new()
        .route(&path, post(receive_lead))
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
}

/// Handle a lead webhook delivery
#[instrument(skip(state, headers, body), fields(source = %source))]
pub async fn receive_lead(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<WebhookAcceptedResponse>), ApiError> {
    match accept_delivery(&state, source, &headers, body).await {
        Ok(response) => {
            let outcome = if response.duplicate {
                "duplicate"
            } else {
                "accepted"
            };
            state.metrics.record_webhook(outcome);
            if let Ok(depth) = state.services.queue.depth().await {
                state.metrics.set_queue_depth(depth);
            }
            Ok((StatusCode::ACCEPTED, Json(response)))
        }
        Err(e) => {
            warn!(error = %e, "Webhook rejected");
            state.metrics.record_webhook("rejected");
            Err(e)
        }
    }
}

async fn accept_delivery(
    state: &AppState,
    source: String,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<WebhookAcceptedResponse, ApiError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge {
                max_size: state.config.server.max_body_size,
            }
        } else {
            ApiError::bad_request(rejection.body_text())
        }
    })?;

    if !state.config.webhooks.accepts_source(&source) {
        return Err(ApiError::not_found(format!("Unknown lead source: {}", source)));
    }

    if let Some(validator) = &state.signature {
        validator.verify(&body, header_value(headers, SIGNATURE_HEADER))?;
    }

    let raw_key = header_value(headers, IDEMPOTENCY_KEY_HEADER)
        .or_else(|| header_value(headers, ALT_IDEMPOTENCY_KEY_HEADER))
        .ok_or_else(|| ApiError::bad_request("Missing Idempotency-Key header"))?;
    let idempotency_key = IdempotencyKey::new(raw_key)
        .map_err(|e| ApiError::bad_request(format!("Invalid Idempotency-Key header: {}", e)))?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON payload: {}", e)))?;

    let event_type = header_value(headers, EVENT_TYPE_HEADER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&state.config.webhooks.default_event_type)
        .to_string();

    let snapshot = header_snapshot(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    );

    let acceptance = state
        .services
        .ingestion
        .accept(WebhookSubmission {
            idempotency_key,
            source,
            event_type,
            payload,
            headers: snapshot,
        })
        .await?;

    Ok(WebhookAcceptedResponse {
        receipt_id: acceptance.receipt_id,
        status: acceptance.status,
        duplicate: acceptance.duplicate,
    })
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
