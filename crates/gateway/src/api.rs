//! Conversation endpoints.
//!
//! - `GET|POST /api/completion`    : one turn against the configured model
//! - `GET|POST /api/assistant`     : one turn against an assistant or a set of assistants
//! - `GET|POST /api/create-stream` : open a progress stream
//! - `GET      /api/streams/{id}`  : server-sent events of a local stream

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::get,
};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use chatrelay_agent::TurnResponse;
use chatrelay_core::{StreamError, StreamHandle};

use crate::SharedState;
use crate::error::ApiError;
use crate::params::{Family, RequestParams};

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/completion", get(completion_handler).post(completion_handler))
        .route("/assistant", get(assistant_handler).post(assistant_handler))
        .route("/create-stream", get(create_stream_handler).post(create_stream_handler))
        .route("/streams/{id}", get(stream_events_handler))
        .with_state(state)
}

async fn run(
    state: SharedState,
    family: Family,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TurnResponse>, ApiError> {
    let turn = RequestParams::new(&body, query, headers).into_turn(family)?;
    info!(
        family = ?family,
        config = turn.config.as_deref().unwrap_or("-"),
        streaming = turn.stream_id.is_some(),
        "Turn requested"
    );
    let response = state.orchestrator.run_turn(turn).await?;
    Ok(Json(response))
}

async fn completion_handler(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TurnResponse>, ApiError> {
    run(state, Family::Completion, query, headers, body).await
}

async fn assistant_handler(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TurnResponse>, ApiError> {
    run(state, Family::Assistant, query, headers, body).await
}

/// Returns `{"stream-id", "stream-url", "expires-at"}`.
async fn create_stream_handler(State(state): State<SharedState>) -> Result<Json<StreamHandle>, ApiError> {
    let handle = state.orchestrator.publisher().create_stream().await?;
    Ok(Json(handle))
}

/// Only the local transport is served from here; Web PubSub clients connect
/// to the service directly with the stream URL.
async fn stream_events_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let local = state.local_streams.as_ref().ok_or(StreamError::NotConfigured)?;
    let rx = local.subscribe(&id).map_err(|e| match e {
        StreamError::Unavailable(_) => ApiError {
            status: StatusCode::NOT_FOUND,
            kind: "stream-unavailable".into(),
            message: format!("no stream {id}"),
        },
        other => other.into(),
    })?;
    info!(stream_id = %id, "Stream subscriber attached");

    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let name = event
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("message")
                .to_string();
            Ok(SseEvent::default().event(name).data(event.to_string()))
        });

    Ok(Sse::new(stream))
}
