use chunkstream_hub::api::create_control_plane;
use chunkstream_hub::config::Config;
use chunkstream_hub::hub::{self, EndpointRegistry, HubState};
use chunkstream_hub::transfer::{self, TransferFilter, TransferManager};
use chunkstream_hub::tracker::ChunkTracker;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        http_port = config.http_port,
        ws_port = config.ws_port,
        download_dir = %config.download_dir.display(),
        "starting hub"
    );

    let (tracker, tracker_events) = ChunkTracker::new(config.tracker_config());
    let manager = Arc::new(TransferManager::new(config.download_dir.clone(), tracker.clone()));
    manager.ensure_directories().await?;

    let registry = EndpointRegistry::new();

    let _event_dispatcher = hub::spawn_event_dispatcher(
        tracker_events,
        tracker,
        manager.clone(),
        registry.clone(),
    );
    let _heartbeat = hub::spawn_heartbeat(registry.clone(), config.heartbeat_config());
    let _sweeper = transfer::spawn_sweeper(
        manager.clone(),
        Duration::from_secs(config.sweep_interval_secs),
        chrono::Duration::hours(config.transfer_retention_hours),
    );

    let control_plane = create_control_plane(registry.clone(), manager.clone());
    let ws_router = hub::router(HubState {
        registry: registry.clone(),
        manager: manager.clone(),
    });

    let http_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    let ws_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.ws_port)).await?;

    tracing::info!("control plane listening on {}", http_listener.local_addr()?);
    tracing::info!("endpoint WebSocket listening on {}", ws_listener.local_addr()?);

    let http_server = axum::serve(http_listener, control_plane).with_graceful_shutdown(shutdown_signal());
    let ws_server = axum::serve(ws_listener, ws_router).with_graceful_shutdown(shutdown_signal());

    let (http_result, ws_result) = tokio::join!(http_server, ws_server);
    http_result?;
    ws_result?;

    tracing::info!("draining in-flight transfers before exit");
    for snapshot in manager.list(TransferFilter::default()) {
        if snapshot.status == "pending" || snapshot.status == "in_progress" {
            let _ = manager.fail(&snapshot.request_id, "shutdown").await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
