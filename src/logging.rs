use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Logs always go to stderr; stdout belongs to the pipe transport.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// One summary line per HTTP request. For the event stream the duration
/// covers only the time to the response head.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration_ms = started_at.elapsed().as_millis();

    if response.status().is_server_error() {
        error!(%method, %path, status, duration_ms, "request failed");
    } else if response.status().is_client_error() {
        warn!(%method, %path, status, duration_ms, "request rejected");
    } else if path == "/health" {
        debug!(%method, %path, status, duration_ms, "request summary");
    } else {
        info!(%method, %path, status, duration_ms, "request summary");
    }

    response
}
