use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod command_runner;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod transport;

use command_runner::CommandRunner;
use domain::{dispatch::Dispatcher, registry::ToolRegistry, tools::register_builtin_tools};
use errors::RegistryError;
use mcp::server::McpServer;
use transport::stream::{StreamSlot, MESSAGES_ENDPOINT};

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub streams: Arc<StreamSlot>,
}

impl AppState {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            streams: Arc::new(StreamSlot::new()),
        }
    }
}

/// Registers the built-in tools and wraps them in a dispatcher.
pub fn build_mcp_server(
    runner: Arc<dyn CommandRunner>,
    nmap_binary: &str,
    tool_timeout: Option<Duration>,
    max_concurrent_calls: usize,
) -> Result<McpServer, RegistryError> {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, runner, nmap_binary)?;

    let dispatcher = Dispatcher::new(Arc::new(registry))
        .with_timeout(tool_timeout)
        .with_max_concurrent_calls(max_concurrent_calls);
    Ok(McpServer::new(dispatcher))
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(http::handlers::SSE_ENDPOINT, get(http::handlers::sse_connect))
        .route(MESSAGES_ENDPOINT, post(http::handlers::post_message))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
