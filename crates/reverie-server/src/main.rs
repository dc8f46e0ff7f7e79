//! Reverie Studio Server - HTTP API for media generation jobs

use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;

use reverie_core::StudioConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "reverie_server=debug,reverie_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reverie Studio Server");

    let host = std::env::var("REVERIE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = match std::env::var("REVERIE_PORT") {
        Ok(raw) => match raw.parse::<u16>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid REVERIE_PORT='{}', falling back to 5000", raw);
                5000
            }
        },
        Err(_) => 5000,
    };
    let addr = format!("{host}:{port}");

    // Load configuration
    let mut config = StudioConfig::default();
    if config.base_url.is_empty() {
        config.base_url = format!("http://{addr}");
    }
    info!("Data directory: {:?}", config.data_dir);
    info!("Models directory: {:?}", config.models_dir);
    info!("Inference socket: {:?}", config.inference_socket);

    std::fs::create_dir_all(config.jobs_dir())?;
    std::fs::create_dir_all(config.avatars_dir())?;

    let state = AppState::new(config)?;
    info!("Services initialized");

    // The single worker drains the job queue for the process lifetime.
    tokio::spawn(state.worker().run());

    // Periodically drop idle rate limiter clients.
    {
        let limiter = state.limiter.clone();
        let retention = Duration::from_secs(state.config.rate_limit_retention_secs);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(300));
            loop {
                tick.tick().await;
                limiter.sweep(retention);
            }
        });
    }

    // Build router
    let app = api::create_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let shutdown_state = state.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_state));

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    Ok(())
}

/// Wait for shutdown signal and cleanup
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
    drop(state);
}
