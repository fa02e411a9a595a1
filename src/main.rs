use std::sync::Arc;

use mcp_tool_server::{
    build_app, build_mcp_server,
    command_runner::ProcessCommandRunner,
    config::{Config, TransportKind},
    logging,
    transport::pipe::PipeSession,
    AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let server = Arc::new(build_mcp_server(
        Arc::new(ProcessCommandRunner::new()),
        &config.nmap_binary,
        config.tool_timeout,
        config.max_concurrent_calls,
    )?);

    match config.transport {
        TransportKind::Stdio => {
            info!("server starting on stdio");
            PipeSession::stdio().run(&server).await?;
        }
        TransportKind::Sse => {
            let bind_socket = config.bind_socket()?;
            let state = AppState::new(server);
            let streams = Arc::clone(&state.streams);
            let app = build_app(state);
            let listener = tokio::net::TcpListener::bind(bind_socket).await?;

            info!(
                bind_addr = %config.bind_addr,
                bind_port = config.bind_port,
                "server starting"
            );

            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    // An open event stream would otherwise hold the shutdown forever.
                    streams.unbind();
                })
                .await?;
        }
    }

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
