//! Progress polling and the server-sent event channel.

use crate::coordinator::UploadError;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use parcel_core::{FAILED_PROGRESS, FileId, ProgressEvent, ProgressSnapshot};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;

/// GET /v1/uploads/{file_id}/progress
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn get_progress(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let file_id = FileId::parse(&file_id)?;
    Ok(Json(state.coordinator.progress(&file_id).await?))
}

/// GET /v1/uploads/{file_id}/events
///
/// Sends a `snapshot` event with the durable state first (when there is
/// any), then live `progress`, `result` and `error` events. The stream ends
/// after a terminal event. Events missed while disconnected can be
/// recovered by polling the progress endpoint.
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn progress_events(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let file_id = FileId::parse(&file_id)?;

    // Subscribe before reading the snapshot so nothing falls in between.
    let mut rx = state.events.subscribe(file_id.as_str());
    let snapshot = match state.coordinator.progress(&file_id).await {
        Ok(snapshot) => Some(snapshot),
        // Clients may subscribe before their first chunk or simple upload.
        Err(UploadError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    let hub = state.events.clone();
    let session_id = file_id.to_string();
    let stream = async_stream::stream! {
        let finished = snapshot
            .as_ref()
            .is_some_and(|s| s.has_result || s.progress == FAILED_PROGRESS);
        if let Some(snapshot) = &snapshot {
            yield Ok(sse_event("snapshot", snapshot));
        }

        if !finished {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        yield Ok(to_sse(&event));
                        if terminal {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(session_id = %session_id, skipped, "Progress subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }

        drop(rx);
        hub.prune(&session_id);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &ProgressEvent) -> Event {
    match event {
        ProgressEvent::Progress { progress } => {
            sse_event(event.name(), &json!({ "progress": progress }))
        }
        ProgressEvent::Result(result) => sse_event(event.name(), result),
        ProgressEvent::Error { error } => sse_event(event.name(), &json!({ "error": error })),
    }
}

fn sse_event(name: &str, payload: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            tracing::warn!(event = name, error = %e, "Failed to encode progress event");
            Event::default().event(name)
        })
}
