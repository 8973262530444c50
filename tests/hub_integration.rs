use axum::body::Body;
use axum::http::{Request, StatusCode};
use chunkstream_hub::api::create_control_plane;
use chunkstream_hub::checksum;
use chunkstream_hub::hub::EndpointRegistry;
use chunkstream_hub::tracker::{ChunkTracker, TrackerConfig};
use chunkstream_hub::transfer::TransferManager;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_tracker_config() -> TrackerConfig {
    TrackerConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        arrival_timeout: Duration::from_secs(5),
    }
}

fn channel() -> tokio::sync::mpsc::UnboundedSender<chunkstream_hub::protocol::ServerMessage> {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    tx
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// S1: small happy-path download, from registration through control-plane
/// status check, matching the literal scenario in the spec's end-to-end
/// examples.
#[tokio::test]
async fn small_happy_path_completes_and_is_visible_over_http() {
    let dir = TempDir::new().unwrap();
    let (tracker, _rx) = ChunkTracker::new(test_tracker_config());
    let manager = Arc::new(TransferManager::new(dir.path().to_path_buf(), tracker));
    manager.ensure_directories().await.unwrap();

    let registry = EndpointRegistry::new();
    registry.register("edge-001", None, channel()).unwrap();

    let app = create_control_plane(registry.clone(), manager.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/downloads")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"clientId":"edge-001","filePath":"/data/x.txt"}"#,
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created = body_json(response).await;
    let request_id = created["requestId"].as_str().unwrap().to_string();

    let data = b"Hello, World!";
    let digest = checksum::hash(data);
    manager
        .on_ack(&request_id, true, Some(data.len() as u64), Some(1), Some(digest.clone()), None, None)
        .await
        .unwrap();

    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    manager
        .on_chunk(&request_id, 0, 1, &encoded, &digest)
        .await
        .unwrap();
    let missing = manager.on_complete(&request_id, &digest).await.unwrap();
    assert!(missing.is_empty());

    let request = Request::builder()
        .uri(format!("/api/v1/downloads/{request_id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["progress"]["percentage"], 100);
}

/// S2: a corrupted chunk retries through the tracker and the transfer still
/// reaches completed, with the retry recorded against the chunk index.
#[tokio::test]
async fn corrupted_chunk_is_retried_then_succeeds() {
    let dir = TempDir::new().unwrap();
    let (tracker, _rx) = ChunkTracker::new(test_tracker_config());
    let manager = Arc::new(TransferManager::new(dir.path().to_path_buf(), tracker));
    manager.ensure_directories().await.unwrap();

    let id = manager.create("edge-001", "/data/big.bin", None).unwrap();
    let data = vec![7u8; 1024];
    let digest = checksum::hash(&data);
    manager
        .on_ack(&id, true, Some(1024), Some(1), Some(digest.clone()), None, None)
        .await
        .unwrap();

    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
    let bad = manager.on_chunk(&id, 0, 1, &encoded, &"0".repeat(64)).await.unwrap();
    assert!(matches!(
        bad,
        chunkstream_hub::transfer::ChunkOutcome::Retry { attempt: 1, .. }
    ));

    let good = manager.on_chunk(&id, 0, 1, &encoded, &digest).await.unwrap();
    assert!(matches!(
        good,
        chunkstream_hub::transfer::ChunkOutcome::Ok { first_time: true }
    ));

    let missing = manager.on_complete(&id, &digest).await.unwrap();
    assert!(missing.is_empty());
    assert_eq!(manager.get(&id).unwrap().status, "completed");
}

/// S3: a second connection cannot register under an id already held live.
#[tokio::test]
async fn duplicate_client_id_is_rejected() {
    let registry = EndpointRegistry::new();
    registry.register("edge-001", None, channel()).unwrap();
    let result = registry.register("edge-001", None, channel());
    assert!(result.is_err());
    assert!(registry.is_connected("edge-001"));
}

/// S4: cancelling mid-transfer removes the scratch file and rejects any
/// further chunk delivery for that transfer id.
#[tokio::test]
async fn cancel_mid_transfer_removes_scratch_and_blocks_further_chunks() {
    let dir = TempDir::new().unwrap();
    let (tracker, _rx) = ChunkTracker::new(test_tracker_config());
    let manager = Arc::new(TransferManager::new(dir.path().to_path_buf(), tracker));
    manager.ensure_directories().await.unwrap();

    let registry = EndpointRegistry::new();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    registry.register("edge-001", None, outbound_tx).unwrap();

    let id = manager.create("edge-001", "/data/big.bin", None).unwrap();
    manager
        .on_ack(&id, true, Some(3 * 1024 * 1024), Some(3), Some("0".repeat(64)), None, None)
        .await
        .unwrap();

    use base64::Engine;
    let chunk = vec![1u8; 1024 * 1024];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&chunk);
    manager
        .on_chunk(&id, 0, 3, &encoded, &checksum::hash(&chunk))
        .await
        .unwrap();

    let app = create_control_plane(registry, manager.clone());
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/downloads/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "cancelled");

    assert_eq!(manager.get(&id).unwrap().status, "cancelled");

    let outcome = manager.on_chunk(&id, 1, 3, &encoded, &checksum::hash(&chunk)).await;
    assert!(outcome.is_err());

    match outbound_rx.try_recv() {
        Ok(chunkstream_hub::protocol::ServerMessage::CancelDownload { request_id, .. }) => {
            assert_eq!(request_id, id);
        }
        other => panic!("expected a CANCEL_DOWNLOAD message to the endpoint, got {other:?}"),
    }
}

/// S5: a stale endpoint is evicted from the registry once its heartbeat is
/// older than the configured timeout.
#[tokio::test]
async fn stale_endpoint_is_evicted() {
    let registry = EndpointRegistry::new();
    registry.register("edge-001", None, channel()).unwrap();
    let evicted = registry.evict_stale(chrono::Duration::seconds(-1));
    assert_eq!(evicted, vec!["edge-001".to_string()]);
    assert!(!registry.is_connected("edge-001"));
}

/// S6: a chunk that fails checksum verification three times in a row drives
/// the transfer to `failed` rather than retrying indefinitely.
#[tokio::test]
async fn chunk_exhausting_retries_fails_the_transfer() {
    let dir = TempDir::new().unwrap();
    let (tracker, _rx) = ChunkTracker::new(test_tracker_config());
    let manager = Arc::new(TransferManager::new(dir.path().to_path_buf(), tracker));
    manager.ensure_directories().await.unwrap();

    let id = manager.create("edge-001", "/data/x.bin", None).unwrap();
    manager
        .on_ack(&id, true, Some(1024), Some(1), Some("0".repeat(64)), None, None)
        .await
        .unwrap();

    use base64::Engine;
    let data = vec![9u8; 1024];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&data);

    let mut last = None;
    for _ in 0..4 {
        last = Some(
            manager
                .on_chunk(&id, 0, 1, &encoded, &"bad".repeat(21))
                .await
                .unwrap(),
        );
    }
    match last {
        Some(chunkstream_hub::transfer::ChunkOutcome::MaxRetriesExceeded { attempts }) => {
            assert_eq!(attempts, 4);
        }
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }

    manager
        .fail_with(
            &id,
            "chunk 0 exceeded max retry attempts (4)",
            "CHUNK_TRANSFER_FAILED",
            Some(serde_json::json!({ "chunkIndex": 0 })),
        )
        .await
        .unwrap();

    let transfer = manager.get(&id).unwrap();
    assert_eq!(transfer.status, "failed");
    let error = transfer.error.expect("failed transfer must expose a structured error");
    assert_eq!(error.code, "CHUNK_TRANSFER_FAILED");
    assert_eq!(error.details.unwrap()["chunkIndex"], 0);
}
