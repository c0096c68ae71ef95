//! Notification routes: dispatch, listing, lookup and open tracking.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::RecordView;
use herald_engine::dispatch::{DispatchBatch, DispatchReport};

use crate::middleware::auth::{AuthUser, DispatchKey};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/dispatch", post(dispatch))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/opened", post(mark_opened))
        .route("/api/notifications/{id}", get(get_notification))
}

/// Response for the notification list.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationList {
    pub notifications: Vec<RecordView>,
    pub total: usize,
    pub unread: usize,
}

/// Request body for marking a notification opened.
#[derive(Debug, Deserialize)]
pub struct MarkOpenedRequest {
    pub record_id: String,
}

/// Response for marking a notification opened.
#[derive(Debug, Serialize, Deserialize)]
pub struct MarkOpenedResponse {
    pub notification: RecordView,
    pub was_already_opened: bool,
}

/// Ids are opaque to callers; anything that is not one of ours is simply unknown.
fn parse_record_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::NotFound(format!("Notification {} not found", raw)))
}

/// POST /api/notifications/dispatch — Persist and fan out a batch.
async fn dispatch(
    State(state): State<AppState>,
    _key: DispatchKey,
    Json(batch): Json<DispatchBatch>,
) -> Result<Json<DispatchReport>, AppError> {
    let report = state.dispatcher.dispatch(batch).await?;
    Ok(Json(report))
}

/// GET /api/notifications — All of the caller's notifications, newest first.
async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<NotificationList>, AppError> {
    let records = state.store.list_all(&auth.identity).await?;
    let unread = records.iter().filter(|r| !r.read).count();
    let notifications: Vec<RecordView> = records.iter().map(RecordView::from).collect();

    Ok(Json(NotificationList {
        total: notifications.len(),
        unread,
        notifications,
    }))
}

/// GET /api/notifications/:id — One of the caller's notifications.
async fn get_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    let record_id = parse_record_id(&id)?;
    let record = state
        .store
        .find_by_recipient_and_id(&auth.identity, record_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", record_id)))?;

    Ok(Json(RecordView::from(record)))
}

/// POST /api/notifications/opened — Mark one of the caller's notifications opened.
///
/// The tracking confirmation, if any, runs detached from this response.
async fn mark_opened(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<MarkOpenedRequest>,
) -> Result<Json<MarkOpenedResponse>, AppError> {
    let record_id = parse_record_id(&req.record_id)?;
    let outcome = state.tracker.mark_opened(&auth.identity, record_id).await?;

    Ok(Json(MarkOpenedResponse {
        notification: RecordView::from(outcome.record),
        was_already_opened: outcome.was_already_opened,
    }))
}
