mod connection;
mod error;
mod events;
mod registry;
mod types;

pub use connection::HubState;
pub use error::{HubError, HubResult};
pub use events::spawn as spawn_event_dispatcher;
pub use registry::EndpointRegistry;
pub use types::{EndpointSnapshot, HeartbeatConfig};

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

/// Endpoint-facing WebSocket surface: a single `/ws` route endpoints dial
/// into to register and stream chunks back.
pub fn router(state: HubState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}

/// Pings every connected endpoint on a fixed interval and disconnects any
/// that hasn't answered within `stale_timeout`.
pub fn spawn_heartbeat(registry: EndpointRegistry, config: HeartbeatConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        let stale_timeout = chrono::Duration::from_std(config.stale_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(90));
        loop {
            ticker.tick().await;
            let stale = registry.evict_stale(stale_timeout);
            for client_id in &stale {
                tracing::warn!(client_id, "endpoint heartbeat stale, disconnecting");
            }
            registry.ping_all();
        }
    })
}
