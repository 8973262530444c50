use crate::hub::error::{HubError, HubResult};
use crate::hub::types::EndpointSnapshot;
use crate::protocol::ServerMessage;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Endpoint {
    client_id: String,
    connected_at: chrono::DateTime<chrono::Utc>,
    last_heartbeat: RwLock<chrono::DateTime<chrono::Utc>>,
    metadata: Option<serde_json::Value>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    close: parking_lot::Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

/// Tracks connected endpoints by their caller-chosen `clientId`. At most one
/// live connection may hold a given id at a time.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Arc<DashMap<String, Endpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client_id` against an outbound sender for its connection.
    /// Rejects a duplicate id still holding a live connection. Returns a
    /// receiver that fires once if the registry forcibly closes this
    /// connection (stale heartbeat eviction), so the reader loop can stop
    /// waiting on the socket.
    pub fn register(
        &self,
        client_id: &str,
        metadata: Option<serde_json::Value>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> HubResult<tokio::sync::oneshot::Receiver<()>> {
        if self.endpoints.contains_key(client_id) {
            return Err(HubError::AlreadyRegistered(client_id.to_string()));
        }
        let now = Utc::now();
        let (close_tx, close_rx) = tokio::sync::oneshot::channel();
        self.endpoints.insert(
            client_id.to_string(),
            Endpoint {
                client_id: client_id.to_string(),
                connected_at: now,
                last_heartbeat: RwLock::new(now),
                metadata,
                outbound,
                close: parking_lot::Mutex::new(Some(close_tx)),
            },
        );
        Ok(close_rx)
    }

    pub fn unregister(&self, client_id: &str) {
        self.endpoints.remove(client_id);
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.endpoints.contains_key(client_id)
    }

    pub fn touch_heartbeat(&self, client_id: &str) {
        if let Some(endpoint) = self.endpoints.get(client_id) {
            *endpoint.last_heartbeat.write() = Utc::now();
        }
    }

    pub fn send_to(&self, client_id: &str, message: ServerMessage) -> HubResult<()> {
        let endpoint = self
            .endpoints
            .get(client_id)
            .ok_or_else(|| HubError::ClientNotConnected(client_id.to_string()))?;
        endpoint
            .outbound
            .send(message)
            .map_err(|_| HubError::ClientNotConnected(client_id.to_string()))
    }

    pub fn get(&self, client_id: &str) -> Option<EndpointSnapshot> {
        self.endpoints.get(client_id).map(|e| snapshot(&e))
    }

    pub fn list(&self) -> Vec<EndpointSnapshot> {
        self.endpoints.iter().map(|e| snapshot(&e)).collect()
    }

    /// Disconnects endpoints whose last heartbeat is older than
    /// `stale_timeout`; returns their ids. Firing the stored close signal
    /// wakes the connection's reader loop even though the socket itself
    /// hasn't produced any bytes.
    pub fn evict_stale(&self, stale_timeout: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - stale_timeout;
        let stale: Vec<String> = self
            .endpoints
            .iter()
            .filter(|e| *e.last_heartbeat.read() < cutoff)
            .map(|e| e.client_id.clone())
            .collect();
        for id in &stale {
            if let Some((_, endpoint)) = self.endpoints.remove(id) {
                if let Some(close_tx) = endpoint.close.lock().take() {
                    let _ = close_tx.send(());
                }
            }
        }
        stale
    }

    /// Sends a PING to every connected endpoint; dead outbound channels are
    /// pruned on the next `evict_stale` pass once the reader loop notices.
    pub fn ping_all(&self) {
        let now = Utc::now();
        for entry in self.endpoints.iter() {
            let _ = entry
                .outbound
                .send(ServerMessage::Ping { timestamp: now });
        }
    }
}

fn snapshot(endpoint: &Endpoint) -> EndpointSnapshot {
    EndpointSnapshot {
        client_id: endpoint.client_id.clone(),
        connected_at: endpoint.connected_at,
        last_heartbeat: *endpoint.last_heartbeat.read(),
        status: "connected".to_string(),
        metadata: endpoint.metadata.clone(),
    }
}
