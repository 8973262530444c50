use crate::hub::registry::EndpointRegistry;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transfer::{ChunkOutcome, TransferManager};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct HubState {
    pub registry: EndpointRegistry,
    pub manager: Arc<TransferManager>,
}

pub async fn handle_socket(socket: WebSocket, state: HubState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let (client_id, mut close_rx) = match register(&mut stream, &state, &outbound_tx).await {
        Some(parts) => parts,
        None => {
            writer.abort();
            return;
        }
    };

    tracing::info!(client_id, "endpoint registered");

    loop {
        tokio::select! {
            biased;
            _ = &mut close_rx => {
                tracing::warn!(client_id, "connection force-closed by stale heartbeat eviction");
                break;
            }
            message = stream.next() => {
                let Some(Ok(message)) = message else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };
                let parsed: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = outbound_tx.send(ServerMessage::Error(crate::protocol::ErrorPayload {
                            code: "INVALID_REQUEST".to_string(),
                            message: e.to_string(),
                            details: None,
                        }));
                        continue;
                    }
                };

                if let Err(e) = dispatch(parsed, &client_id, &state, &outbound_tx).await {
                    tracing::warn!(client_id, error = %e, "failed to handle client message");
                }
            }
        }
    }

    state.registry.unregister(&client_id);
    writer.abort();
    tracing::info!(client_id, "endpoint disconnected");
}

async fn register(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &HubState,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Option<(String, tokio::sync::oneshot::Receiver<()>)> {
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(_) => continue,
        };

        return match parsed {
            ClientMessage::Register { client_id, metadata } => {
                match state.registry.register(&client_id, metadata, outbound_tx.clone()) {
                    Ok(close_rx) => {
                        let _ = outbound_tx.send(ServerMessage::RegisterAck {
                            success: true,
                            message: "registered".to_string(),
                        });
                        Some((client_id, close_rx))
                    }
                    Err(_) => {
                        let _ = outbound_tx.send(ServerMessage::RegisterAck {
                            success: false,
                            message: "clientId already in use".to_string(),
                        });
                        None
                    }
                }
            }
            ClientMessage::Ping { timestamp: _ } => {
                let _ = outbound_tx.send(ServerMessage::Pong {
                    timestamp: chrono::Utc::now(),
                });
                continue;
            }
            _ => {
                let _ = outbound_tx.send(ServerMessage::Error(crate::protocol::ErrorPayload {
                    code: "INVALID_REQUEST".to_string(),
                    message: "expected REGISTER as the first message".to_string(),
                    details: None,
                }));
                None
            }
        };
    }
    None
}

async fn dispatch(
    message: ClientMessage,
    client_id: &str,
    state: &HubState,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
) -> anyhow::Result<()> {
    match message {
        ClientMessage::Register { .. } => {
            let _ = outbound_tx.send(ServerMessage::Error(crate::protocol::ErrorPayload {
                code: "INVALID_REQUEST".to_string(),
                message: "already registered".to_string(),
                details: None,
            }));
        }
        ClientMessage::DownloadAck {
            request_id,
            success,
            file_size,
            total_chunks,
            file_checksum,
            error,
        } => {
            let (error_code, error_message) = match error {
                Some(e) => (Some(e.code), Some(e.message)),
                None => (None, None),
            };
            state
                .manager
                .on_ack(
                    &request_id,
                    success,
                    file_size,
                    total_chunks,
                    file_checksum,
                    error_code,
                    error_message,
                )
                .await?;
        }
        ClientMessage::FileChunk {
            request_id,
            chunk_index,
            total_chunks,
            data,
            checksum,
            ..
        } => {
            let outcome = state
                .manager
                .on_chunk(&request_id, chunk_index, total_chunks, &data, &checksum)
                .await?;
            if let ChunkOutcome::MaxRetriesExceeded { attempts } = outcome {
                state
                    .manager
                    .fail_with(
                        &request_id,
                        &format!("chunk {chunk_index} exceeded max retry attempts ({attempts})"),
                        "CHUNK_TRANSFER_FAILED",
                        Some(serde_json::json!({ "chunkIndex": chunk_index })),
                    )
                    .await?;
            }
        }
        ClientMessage::DownloadComplete {
            request_id,
            file_checksum,
            ..
        } => {
            let missing = state.manager.on_complete(&request_id, &file_checksum).await?;
            if !missing.is_empty() {
                tracing::info!(request_id, ?missing, "download complete reported missing chunks");
            }
        }
        ClientMessage::Ping { .. } => {
            state.registry.touch_heartbeat(client_id);
            let _ = outbound_tx.send(ServerMessage::Pong {
                timestamp: chrono::Utc::now(),
            });
        }
        ClientMessage::Pong { .. } => {
            state.registry.touch_heartbeat(client_id);
        }
        ClientMessage::Error(payload) => {
            tracing::warn!(client_id, code = %payload.code, message = %payload.message, "endpoint reported an error");
        }
    }
    Ok(())
}
