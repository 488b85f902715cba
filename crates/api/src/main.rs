//! Courier API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::{AppConfig, TransportKind};
use courier_engine::dispatcher::Dispatcher;
use courier_engine::session::SessionController;
use courier_notifier::{BridgeTransport, MemoryTransport, MessagingTransport};

use courier_api::routes::create_router;
use courier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("courier_api=debug,courier_engine=debug,courier_notifier=info,tower_http=debug")
    });
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting Courier API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let transport: Arc<dyn MessagingTransport> = match config.transport {
        TransportKind::Bridge => Arc::new(BridgeTransport::new(
            config.bridge_url.clone(),
            config.session_data_path.clone(),
            config.bridge_poll_interval(),
        )?),
        TransportKind::Memory => {
            tracing::warn!("Using in-memory transport, messages will not leave this process");
            Arc::new(MemoryTransport::new().auto_ready())
        }
    };

    // Connect the messaging session in the background; the HTTP API is usable
    // (and reports readiness) while it comes up.
    let session = SessionController::new(transport);
    tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });

    let dispatcher = Dispatcher::new(session.clone(), config.message_delay());
    tracing::info!(
        delay_secs = config.message_delay().as_secs(),
        "Dispatcher ready"
    );

    // Build router
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(dispatcher.clone(), config);
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let dropped = dispatcher.queue_len();
    if dropped > 0 {
        tracing::warn!(dropped, "Discarding queued notifications at shutdown");
    }
    session.shutdown().await;

    tracing::info!("Courier API server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received shutdown signal, stopping gracefully...");
}
