//! End-to-end tests for the streaming gateway.

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use sandbox_gateway::cluster::Locality;
use sandbox_gateway::config::GatewayMode;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_is_faithful_for_any_transport_chunking() {
    let functions = functions_dir(&[("echo", STREAM_ECHO)]);
    let config = test_config(GatewayMode::Streaming, &functions);
    let gateway = start_gateway(config, functions).await;
    let body = payload(10_000);

    for chunk in [1, 7, 4096] {
        let response = send_raw(gateway.addr, "POST", "/echo", &body, chunk).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-length"), None);
        assert_eq!(response.header("transfer-encoding"), Some("chunked"));
        assert_eq!(response.header("connection"), Some("close"));
        assert!(response.body == body, "echo mismatch with chunk size {}", chunk);
    }

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn small_buffers_still_deliver_everything() {
    let functions = functions_dir(&[("echo", STREAM_ECHO)]);
    let mut config = test_config(GatewayMode::Streaming, &functions);
    config.streaming.read_buffer_size = 3;
    config.streaming.write_buffer_size = 5;
    let gateway = start_gateway(config, functions).await;

    let body = payload(2_000);
    let response = send_raw(gateway.addr, "POST", "/echo", &body, 100).await;
    assert_eq!(response.status, 200);
    assert!(response.body == body);

    gateway.stop().await;
}

#[tokio::test]
async fn non_post_is_rejected_without_invocation() {
    let functions = functions_dir(&[]);
    let config = test_config(GatewayMode::Streaming, &functions);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let locality: Arc<dyn Locality> = Arc::new(RecordingLocality::new(0, Arc::clone(&calls)));
    let gateway = start_with_localities(config, registry_with(&["/echo"]), vec![locality]).await;

    let response = send_raw(gateway.addr, "GET", "/echo", b"", 1).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body, b"Invalid request-method.");
    assert!(calls.lock().unwrap().is_empty());

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_path_yields_empty_body() {
    let functions = functions_dir(&[("echo", STREAM_ECHO)]);
    let config = test_config(GatewayMode::Streaming, &functions);
    let gateway = start_gateway(config, functions).await;

    let response = send_raw(gateway.addr, "POST", "/missing", b"", 1).await;
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stub_locality_sees_path_and_streams_back() {
    let functions = functions_dir(&[]);
    let config = test_config(GatewayMode::Streaming, &functions);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let locality: Arc<dyn Locality> = Arc::new(RecordingLocality::new(0, Arc::clone(&calls)));
    let gateway = start_with_localities(config, registry_with(&[]), vec![locality]).await;

    let response = send_raw(gateway.addr, "POST", "/anything", b"through the stub", 4).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"through the stub");
    assert_eq!(calls.lock().unwrap()[0].1, "/anything");

    gateway.stop().await;
}
