//! Deal, contact, activity and timeline endpoints
//!
//! Every handler authenticates through [`AuthenticatedActor`]; the domain
//! services perform the capability checks.

use crate::auth::AuthenticatedActor;
use crate::errors::ApiError;
use crate::responses::{
    AssignRequest, ContactListParams, ExportRequest, LostRequest, StageRequest, TimelineParams,
    WonRequest,
};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use lead_keeper_core::activity::{NewEmail, NewTask};
use lead_keeper_core::contact::{ContactDraft, ContactPatch};
use lead_keeper_core::deal::NewDeal;
use lead_keeper_core::storage::ContactFilter;
use lead_keeper_core::{
    Contact, ContactId, Deal, DealId, EmailActivity, ExportFormat, Task, TaskId, TimelineEntryType,
    TimelinePage, TimelineQuery, Timestamp,
};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::instrument;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/deals", post(create_deal))
        .route("/api/deals/{id}", get(get_deal).delete(delete_deal))
        .route("/api/deals/{id}/stage", post(change_stage))
        .route("/api/deals/{id}/won", post(mark_won))
        .route("/api/deals/{id}/lost", post(mark_lost))
        .route("/api/deals/{id}/assign", post(assign_deal))
        .route("/api/deals/{id}/restore", post(restore_deal))
        .route("/api/contacts", post(create_contact).get(list_contacts))
        .route("/api/contacts/export", post(export_contacts))
        .route(
            "/api/contacts/{id}",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
        .route("/api/contacts/{id}/restore", post(restore_contact))
        .route("/api/contacts/{id}/deals", get(contact_deals))
        .route("/api/contacts/{id}/timeline", get(contact_timeline))
        .route("/api/contacts/{id}/tasks", post(create_task))
        .route("/api/contacts/{id}/emails", post(log_email))
        .route("/api/tasks/{id}/complete", post(complete_task))
}

/// Unwrap a JSON body, reporting malformed input in the API error format
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Like [`json_body`], but a request without a JSON body yields the default
pub(crate) fn optional_json_body<T: Default>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    match body {
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        other => json_body(other),
    }
}

// ============================================================================
// Deals
// ============================================================================

#[instrument(skip(state, actor, body))]
async fn create_deal(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    body: Result<Json<NewDeal>, JsonRejection>,
) -> Result<(StatusCode, Json<Deal>), ApiError> {
    let deal = state.services.deals.create(&actor, json_body(body)?).await?;
    state.metrics.record_deal_transition("create");
    Ok((StatusCode::CREATED, Json(deal)))
}

#[instrument(skip(state, actor))]
async fn get_deal(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Deal>, ApiError> {
    let id = DealId::from_str(&id)?;
    Ok(Json(state.services.deals.get(&actor, id).await?))
}

#[instrument(skip(state, actor, body))]
async fn change_stage(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    body: Result<Json<StageRequest>, JsonRejection>,
) -> Result<Json<Deal>, ApiError> {
    let id = DealId::from_str(&id)?;
    let request = json_body(body)?;
    let deal = state
        .services
        .deals
        .change_stage(&actor, id, request.stage, request.probability)
        .await?;
    state.metrics.record_deal_transition("change_stage");
    Ok(Json(deal))
}

#[instrument(skip(state, actor, body))]
async fn mark_won(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    body: Result<Json<WonRequest>, JsonRejection>,
) -> Result<Json<Deal>, ApiError> {
    let id = DealId::from_str(&id)?;
    let request = optional_json_body(body)?;
    let deal = state
        .services
        .deals
        .mark_won(&actor, id, request.won_amount)
        .await?;
    state.metrics.record_deal_transition("mark_won");
    Ok(Json(deal))
}

#[instrument(skip(state, actor, body))]
async fn mark_lost(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    body: Result<Json<LostRequest>, JsonRejection>,
) -> Result<Json<Deal>, ApiError> {
    let id = DealId::from_str(&id)?;
    let request = json_body(body)?;
    let deal = state
        .services
        .deals
        .mark_lost(&actor, id, request.lost_reason.as_deref().unwrap_or_default())
        .await?;
    state.metrics.record_deal_transition("mark_lost");
    Ok(Json(deal))
}

#[instrument(skip(state, actor, body))]
async fn assign_deal(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<Deal>, ApiError> {
    let id = DealId::from_str(&id)?;
    let request = json_body(body)?;
    let deal = state
        .services
        .deals
        .assign(&actor, id, request.owner_id)
        .await?;
    state.metrics.record_deal_transition("assign");
    Ok(Json(deal))
}

#[instrument(skip(state, actor))]
async fn delete_deal(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Deal>, ApiError> {
    let id = DealId::from_str(&id)?;
    let deal = state.services.deals.delete(&actor, id).await?;
    state.metrics.record_deal_transition("delete");
    Ok(Json(deal))
}

#[instrument(skip(state, actor))]
async fn restore_deal(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Deal>, ApiError> {
    let id = DealId::from_str(&id)?;
    let deal = state.services.deals.restore(&actor, id).await?;
    state.metrics.record_deal_transition("restore");
    Ok(Json(deal))
}

// ============================================================================
// Contacts
// ============================================================================

#[instrument(skip(state, actor, body))]
async fn create_contact(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    body: Result<Json<ContactDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Contact>), ApiError> {
    let contact = state
        .services
        .contacts
        .create(&actor, json_body(body)?)
        .await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

#[instrument(skip(state, actor))]
async fn list_contacts(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(params): Query<ContactListParams>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let filter = ContactFilter {
        include_deleted: params.include_deleted,
        status: params.status,
        limit: params.limit,
    };
    Ok(Json(state.services.contacts.list(&actor, filter).await?))
}

#[instrument(skip(state, actor))]
async fn get_contact(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Contact>, ApiError> {
    let id = ContactId::from_str(&id)?;
    Ok(Json(state.services.contacts.get(&actor, id).await?))
}

#[instrument(skip(state, actor, body))]
async fn update_contact(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    body: Result<Json<ContactPatch>, JsonRejection>,
) -> Result<Json<Contact>, ApiError> {
    let id = ContactId::from_str(&id)?;
    let contact = state
        .services
        .contacts
        .update(&actor, id, json_body(body)?)
        .await?;
    Ok(Json(contact))
}

#[instrument(skip(state, actor))]
async fn delete_contact(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Contact>, ApiError> {
    let id = ContactId::from_str(&id)?;
    Ok(Json(state.services.contacts.delete(&actor, id).await?))
}

#[instrument(skip(state, actor))]
async fn restore_contact(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Contact>, ApiError> {
    let id = ContactId::from_str(&id)?;
    Ok(Json(state.services.contacts.restore(&actor, id).await?))
}

/// Export every live contact; the body is the rendered file
#[instrument(skip(state, actor, body))]
async fn export_contacts(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    body: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = optional_json_body(body)?;
    let format = match request.format.as_deref() {
        Some(raw) => ExportFormat::from_str(raw)?,
        None => ExportFormat::default(),
    };

    let export = state.services.contacts.export(&actor, format).await?;
    Ok((
        [
            (header::CONTENT_TYPE, export.format.content_type().to_string()),
            (
                header::HeaderName::from_static("x-record-count"),
                export.record_count.to_string(),
            ),
        ],
        export.content,
    )
        .into_response())
}

#[instrument(skip(state, actor))]
async fn contact_deals(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Vec<Deal>>, ApiError> {
    let id = ContactId::from_str(&id)?;
    Ok(Json(
        state.services.deals.list_for_contact(&actor, id).await?,
    ))
}

#[instrument(skip(state, actor, params))]
async fn contact_timeline(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<TimelinePage>, ApiError> {
    let query = timeline_query(ContactId::from_str(&id)?, params)?;
    Ok(Json(state.services.timeline.query(&actor, query).await?))
}

/// Translate query-string parameters into a timeline query
pub(crate) fn timeline_query(
    contact_id: ContactId,
    params: TimelineParams,
) -> Result<TimelineQuery, ApiError> {
    let mut types = BTreeSet::new();
    for raw in params.types.as_deref().unwrap_or_default().split(',') {
        if !raw.trim().is_empty() {
            types.insert(TimelineEntryType::from_str(raw)?);
        }
    }

    let mut query = TimelineQuery::for_contact(contact_id);
    query.types = types;
    query.from = params.from.as_deref().map(Timestamp::from_rfc3339).transpose()?;
    query.to = params.to.as_deref().map(Timestamp::from_rfc3339).transpose()?;
    query.cursor = params.cursor.filter(|c| !c.is_empty());
    query.limit = params.limit;
    Ok(query)
}

// ============================================================================
// Activity
// ============================================================================

#[instrument(skip(state, actor, body))]
async fn create_task(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let id = ContactId::from_str(&id)?;
    let task = state
        .services
        .activity
        .create_task(&actor, id, json_body(body)?)
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[instrument(skip(state, actor))]
async fn complete_task(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = TaskId::from_str(&id)?;
    Ok(Json(
        state.services.activity.complete_task(&actor, id).await?,
    ))
}

#[instrument(skip(state, actor, body))]
async fn log_email(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    body: Result<Json<NewEmail>, JsonRejection>,
) -> Result<(StatusCode, Json<EmailActivity>), ApiError> {
    let id = ContactId::from_str(&id)?;
    let email = state
        .services
        .activity
        .log_email(&actor, id, json_body(body)?)
        .await?;
    Ok((StatusCode::CREATED, Json(email)))
}

#[cfg(test)]
#[path = "crm_tests.rs"]
mod tests;
