use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brankas_api::auth::jwt::TokenService;
use brankas_api::auth::session::SessionController;
use brankas_api::background::token_refresh::TokenRefresher;
use brankas_api::config::ServerConfig;
use brankas_api::router::build_app_router;
use brankas_api::state::AppState;
use brankas_events::{EventBus, EventLogger};
use brankas_store::{FileStore, InMemoryUserDirectory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brankas_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        "Loaded server configuration"
    );

    // --- Storage ---
    let store =
        Arc::new(FileStore::open(&config.data_dir).context("Failed to open data directory")?);
    let directory = Arc::new(InMemoryUserDirectory::new());

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(event_bus.subscribe()));

    // --- Session controller ---
    let tokens = Arc::new(TokenService::new(config.jwt.clone()));
    let controller = SessionController::start(
        store,
        directory,
        Arc::clone(&tokens),
        Arc::clone(&event_bus),
    )
    .await
    .context("Failed to start session controller")?;
    tracing::info!(status = ?controller.status(), "Session controller started");

    // --- Token revalidation ---
    let refresher_cancel = CancellationToken::new();
    let refresher = TokenRefresher::new(controller.clone(), config.revalidate_interval());
    let refresher_handle = tokio::spawn(refresher.supervise(refresher_cancel.clone()));

    // --- Router ---
    let state = AppState { controller, tokens };
    let app = build_app_router(state, &config).context("Failed to build router")?;

    // --- Start server ---
    let host = config
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid HOST address {:?}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    refresher_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), refresher_handle).await;
    tracing::info!("Token refresher stopped");

    // The logger exits once the last bus handle is gone.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
