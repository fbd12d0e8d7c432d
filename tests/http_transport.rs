//! Integration tests for `HttpTransport` against a mock backend.
//!
//! Covers catalog parsing, download acknowledgements, chat replies and the
//! mapping of transport and backend failures to error codes.

use std::time::Duration;

use freddie::FreddieError;
use freddie::config::BackendConfig;
use freddie::registry::{BackendTransport, ChatRequest, DownloadAck, DownloadState, HttpTransport};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport_for(server: &MockServer, timeout_secs: u64) -> HttpTransport {
    HttpTransport::new(&BackendConfig {
        base_url: format!("{}/api", server.uri()),
        timeout_secs,
    })
}

// ── Catalog ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_catalog_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/modules/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "modules": [
                {
                    "id": "mistral-7b",
                    "display_name": "Mistral 7B",
                    "size_bytes": 4370000000u64,
                    "downloaded": false,
                    "download_status": {
                        "status": "downloading",
                        "progress": 12.0,
                        "downloaded_bytes": 524000000u64,
                        "total_bytes": 4370000000u64,
                        "speed": 2048000.0,
                        "eta": 1877.0
                    }
                },
                {"id": "phi-3-mini", "display_name": "Phi-3 Mini", "downloaded": true}
            ],
            "timestamp": 1718000000.0
        })))
        .mount(&server)
        .await;

    let modules = transport_for(&server, 2)
        .fetch_catalog()
        .await
        .unwrap_or_else(|e| panic!("Expected Ok, got Err: {e}"));

    assert_eq!(modules.len(), 2);
    assert!(
        matches!(modules[0].state, DownloadState::Downloading(_)),
        "Expected Downloading, got: {:?}",
        modules[0].state
    );
    assert!(modules[1].downloaded);
    assert_eq!(modules[1].state, DownloadState::Idle);
}

#[tokio::test]
async fn test_fetch_catalog_bare_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/modules/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "m1"}])))
        .mount(&server)
        .await;

    let modules = transport_for(&server, 2)
        .fetch_catalog()
        .await
        .unwrap_or_else(|e| panic!("Expected Ok, got Err: {e}"));
    assert_eq!(modules[0].id, "m1");
}

#[tokio::test]
async fn test_fetch_catalog_garbage_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/modules/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = transport_for(&server, 2).fetch_catalog().await;
    assert!(
        matches!(err, Err(FreddieError::Backend(_))),
        "Expected Backend error, got: {err:?}"
    );
}

// ── Downloads ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_download_acknowledgements() {
    let cases = [
        ("downloading", DownloadAck::Started),
        ("already_downloaded", DownloadAck::AlreadyDownloaded),
        ("already_downloading", DownloadAck::AlreadyDownloading),
    ];
    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/modules/download/"))
            .and(body_json(json!({"module_id": "m1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": status,
                "module_id": "m1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = transport_for(&server, 2)
            .start_download("m1")
            .await
            .unwrap_or_else(|e| panic!("Expected Ok for {status}, got Err: {e}"));
        assert_eq!(ack, expected);
    }
}

#[tokio::test]
async fn test_start_download_error_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/modules/download/"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "Module not found"})),
        )
        .mount(&server)
        .await;

    let err = transport_for(&server, 2).start_download("nope").await;
    assert_eq!(err, Err(FreddieError::Backend("Module not found".into())));
}

#[tokio::test]
async fn test_non_json_error_maps_to_http_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/modules/cancel/"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = transport_for(&server, 2).cancel_download("m1").await;
    assert_eq!(err, Err(FreddieError::Backend("HTTP 502".into())));
}

#[tokio::test]
async fn test_cancel_and_delete_post_module_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/modules/cancel/"))
        .and(body_json(json!({"module_id": "m1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "cancelled"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/modules/delete/"))
        .and(body_json(json!({"module_id": "m2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server, 2);
    assert_eq!(transport.cancel_download("m1").await, Ok(()));
    assert_eq!(transport.delete_module("m2").await, Ok(()));
}

// ── Chat ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_returns_response_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/"))
        .and(body_json(json!({
            "module_id": "m1",
            "message": "Hello",
            "files": ["notes.txt"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Hi!"})))
        .mount(&server)
        .await;

    let reply = transport_for(&server, 2)
        .chat(&ChatRequest {
            module_id: "m1".into(),
            message: "Hello".into(),
            files: vec!["notes.txt".into()],
        })
        .await;
    assert_eq!(reply, Ok("Hi!".to_owned()));
}

#[tokio::test]
async fn test_chat_server_error_uses_error_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "model not loaded"})),
        )
        .mount(&server)
        .await;

    let reply = transport_for(&server, 2)
        .chat(&ChatRequest {
            module_id: "m1".into(),
            message: "Hello".into(),
            files: Vec::new(),
        })
        .await;
    assert_eq!(reply, Err(FreddieError::Backend("model not loaded".into())));
}

// ── Transport failures ────────────────────────────────────────────

#[tokio::test]
async fn test_timeout_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/modules/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let err = transport_for(&server, 1)
        .fetch_catalog()
        .await
        .err()
        .unwrap_or_else(|| panic!("Expected timeout error"));
    assert_eq!(err.code(), "NETWORK_ERROR");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Use a port that's guaranteed to not have a server
    let transport = HttpTransport::new(&BackendConfig {
        base_url: "http://localhost:59998/api".into(),
        timeout_secs: 1,
    });

    let err = transport
        .fetch_catalog()
        .await
        .err()
        .unwrap_or_else(|| panic!("Expected connection error"));
    assert!(
        matches!(err, FreddieError::Network(_)),
        "Expected Network, got: {err:?}"
    );
}
