//! Axum HTTP handlers for the web server
//!
//! Provides the server-sent-events stream, its companion message-post endpoint,
//! and general metadata endpoints.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::errors::AppError;
use crate::transport::stream::{StreamEvent, StreamSession, StreamSlot, MESSAGES_ENDPOINT};
use crate::AppState;

pub const SSE_ENDPOINT: &str = "/mcp/sse";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub sse_endpoint: &'static str,
    pub messages_endpoint: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        sse_endpoint: SSE_ENDPOINT,
        messages_endpoint: MESSAGES_ENDPOINT,
    })
}

/// Opens the push leg. Supersedes whatever stream was bound before.
pub async fn sse_connect(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.streams.connect();
    Sse::new(session_events(session)).keep_alive(KeepAlive::default())
}

fn session_events(session: StreamSession) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(session, |mut session| async move {
        let event = match session.recv().await? {
            StreamEvent::Endpoint(path) => Event::default().event("endpoint").data(path),
            StreamEvent::Message(message) => Event::default()
                .event("message")
                .data(serde_json::to_string(&message).unwrap_or_default()),
        };
        Some((Ok::<_, Infallible>(event), session))
    })
}

/// Request leg. Acknowledges as soon as the message is accepted; the
/// response is produced in the background and travels over the bound stream.
pub async fn post_message(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::bad_request("invalid_message", "message body must be valid JSON"))?;

    let Some(session) = state.streams.bound_session() else {
        warn!("message received with no stream bound; dropping it");
        return Ok(accepted());
    };

    tokio::spawn(async move {
        let Some(response) = state.server.handle_payload(payload).await else {
            return;
        };
        deliver(&state.streams, session, response);
    });

    Ok(accepted())
}

fn deliver(streams: &StreamSlot, session: u64, response: Value) {
    match streams.push(response) {
        Ok(delivered_to) if delivered_to != session => {
            warn!(received_on = session, delivered_to, "response delivered to a newer stream");
        }
        Ok(_) => {}
        Err(err) => warn!(session, error = %err, "response could not be delivered"),
    }
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, "Accepted").into_response()
}
