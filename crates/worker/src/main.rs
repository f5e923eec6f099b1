use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crossline_events::{EventBus, EventJournal};
use crossline_worker::config::WorkerConfig;
use crossline_worker::service::Service;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "crossline_worker=info,crossline_pipeline=info,crossline_cloud=info".into()
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");
    tracing::info!(
        mode = ?config.mode,
        event_id = %config.event_id,
        storage = ?config.storage,
        "Loaded worker configuration"
    );

    // --- Events ---
    let event_bus = Arc::new(EventBus::default());
    let journal_handle = config.crossing_journal.clone().map(|path| {
        tracing::info!(path = %path.display(), "Journaling crossings");
        tokio::spawn(EventJournal::run(path, event_bus.subscribe()))
    });

    // --- Service ---
    let service = Service::from_config(&config, event_bus.clone())
        .await
        .expect("Failed to set up worker");

    let cancel = CancellationToken::new();
    let service_cancel = cancel.clone();
    let service_handle = tokio::spawn(async move { service.run(service_cancel).await });

    shutdown_signal().await;
    cancel.cancel();

    if service_handle.await.is_err() {
        tracing::error!("Service task panicked");
    }

    drop(event_bus);
    if let Some(handle) = journal_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Shutdown complete");
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, stopping"),
        () = terminate => tracing::info!("Received SIGTERM, stopping"),
    }
}
