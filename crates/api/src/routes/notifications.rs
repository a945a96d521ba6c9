//! Live order notifications as server-sent events.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use common::UserId;
use futures_util::{Stream, StreamExt};
use saga::Notification;

use crate::error::ApiError;
use crate::routes::orders::AppState;

/// GET /notifications/{user_id}: streams the user's order events.
///
/// Each SSE message carries the event type as `event`, the event id as
/// `id` and the event payload as JSON `data`. Events published while the
/// stream is not connected are not replayed.
#[tracing::instrument(skip(state))]
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let user_id = user_id
        .parse::<UserId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?;

    let subscription = state.notifications.subscribe(user_id);
    metrics::counter!("notification_streams_opened_total").increment(1);
    tracing::debug!(%user_id, "Notification stream opened");

    Ok(Sse::new(subscription.map(to_sse_event)).keep_alive(KeepAlive::default()))
}

fn to_sse_event(notification: Notification) -> Result<Event, axum::Error> {
    Event::default()
        .event(notification.event_type())
        .id(notification.event_id.to_string())
        .json_data(&notification.event)
}
