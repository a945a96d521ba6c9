//! Dead-letter inspection endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use event_log::{dead_letter_topic, is_dead_letter_topic};
use saga::DeadLetterRecord;
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Serialize)]
pub struct DeadLettersResponse {
    pub topic: String,
    pub dead_letter_topic: String,
    pub count: usize,
    pub records: Vec<DeadLetterRecord>,
}

/// GET /dead-letters/{topic}: lists what the consumers of `topic` gave up on.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
) -> Result<Json<DeadLettersResponse>, ApiError> {
    if topic.trim().is_empty() || is_dead_letter_topic(&topic) {
        return Err(ApiError::BadRequest(format!(
            "Expected a source topic, got {topic:?}"
        )));
    }

    let records = saga::dead_letters(state.saga.log().as_ref(), &topic).await?;
    Ok(Json(DeadLettersResponse {
        dead_letter_topic: dead_letter_topic(&topic),
        count: records.len(),
        topic,
        records,
    }))
}
