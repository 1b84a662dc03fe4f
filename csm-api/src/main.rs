//! csm-api service entry point.

use anyhow::Result;
use csm_api::{build_router, AppState};
use csm_common::config::Config;
use csm_common::logging::init_logging;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::from_env()?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("CSM API v{}", env!("CARGO_PKG_VERSION"));

    config.ensure_work_dir()?;
    if !config.inference.has_placeholders() {
        tracing::warn!(
            inference_cmd = %config.inference.command,
            "INFERENCE_CMD is missing {{input}} or {{output}}; every /infer call will fail"
        );
    }

    tracing::info!(
        inference_cmd = %config.inference.command,
        shell = config.inference.shell,
        timeout_secs = config.inference.timeout_secs,
        work_dir = %config.storage.work_dir.display(),
        "Inference configured"
    );

    let addr = config.server.socket_addr()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = build_router(AppState::new(config)).layer(cors);

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
                }
            }
            _ => {
                tracing::warn!("Failed to install signal handlers, running until killed");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
        } else {
            std::future::pending::<()>().await;
        }
    }
}
