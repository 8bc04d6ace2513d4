//! Streaming endpoints: start/continue a workflow and resume after an interrupt.
//!
//! Each request runs in two phases. The prepare phase (classification,
//! permission, thread/interrupt resolution) happens before the response is
//! committed — its errors are plain HTTP errors and leave nothing behind. Once
//! prepared, the response is committed as newline-delimited JSON, one event per
//! line stamped with the thread envelope (`thread_id`, `seq`), and every later
//! outcome arrives as an event. Dropping the response body (client disconnect)
//! fires a drop guard that cancels the workflow thread cooperatively; detached
//! jobs never stream and are unaffected.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use stream_event::{StreamEnvelope, WireEvent};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use olav::dispatch::StreamRequest;
use olav::graph::ResumeDecision;
use olav::stream::StreamEmitter;
use olav::OrchestratorError;

use crate::app::AppState;
use crate::auth::require_session;
use crate::error::ApiError;

/// POST /orchestrator/stream
pub(crate) async fn stream_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StreamRequest>,
) -> Result<Response, ApiError> {
    let session = require_session(&state, &headers).await?;
    let cancel = CancellationToken::new();
    let prepared = state
        .orchestrator
        .dispatcher
        .prepare(&session, req, &cancel)
        .await
        .map_err(ApiError)?;
    let thread_id = prepared.thread_id().to_string();

    let (emitter, rx) = StreamEmitter::channel(state.orchestrator.settings.stream_buffer_events);
    let dispatcher = state.orchestrator.dispatcher.clone();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        dispatcher.run_prepared(prepared, emitter, run_cancel).await;
    });

    ndjson_response(thread_id, rx, cancel)
}

/// POST /orchestrator/resume
pub(crate) async fn resume_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(decision): Json<ResumeDecision>,
) -> Result<Response, ApiError> {
    let session = require_session(&state, &headers).await?;
    let prepared = state
        .orchestrator
        .dispatcher
        .prepare_resume(&session, decision)
        .await
        .map_err(ApiError)?;
    let thread_id = prepared.thread.thread_id.clone();

    let cancel = CancellationToken::new();
    let (emitter, rx) = StreamEmitter::channel(state.orchestrator.settings.stream_buffer_events);
    let dispatcher = state.orchestrator.dispatcher.clone();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        dispatcher.run_resume(prepared, emitter, run_cancel).await;
    });

    ndjson_response(thread_id, rx, cancel)
}

/// Commits an `application/x-ndjson` response over the event channel. The drop
/// guard is owned by the body stream: a client that goes away cancels the run.
fn ndjson_response(
    thread_id: String,
    rx: tokio::sync::mpsc::Receiver<WireEvent>,
    cancel: CancellationToken,
) -> Result<Response, ApiError> {
    let mut envelope = StreamEnvelope::new(thread_id);
    let guard = cancel.drop_guard();

    let lines = ReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        let line = stream_event::to_ndjson_line(&event, &mut envelope).unwrap_or_else(|e| {
            tracing::error!(error = %e, "event encode failed");
            "{\"type\":\"error\",\"code\":\"internal_error\",\"message\":\"event encode failed\",\"recoverable\":false}\n"
                .to_string()
        });
        Ok::<Bytes, std::convert::Infallible>(Bytes::from(line))
    });

    Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(lines))
        .map_err(|e| ApiError(OrchestratorError::Internal(e.to_string())))
}
