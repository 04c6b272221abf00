//! Shared utilities for gateway integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use sandbox_gateway::cluster::{
    ByteReceiver, ByteSender, InvocationError, Locality, LocalityId, LocalitySet,
};
use sandbox_gateway::config::{GatewayConfig, GatewayMode};
use sandbox_gateway::lifecycle::{self, Shutdown};
use sandbox_gateway::net::{ConnectionTracker, ListenerError};
use sandbox_gateway::registry::FunctionRegistry;
use sandbox_gateway::GatewayServer;

pub const BULK_ECHO: &str = include_str!("../../functions/bulk/echo.wat");
pub const BULK_REVERSE: &str = include_str!("../../functions/bulk/reverse.wat");
pub const STREAM_ECHO: &str = include_str!("../../functions/streaming/echo.wat");

/// Write `(stem, source)` pairs as `.wat` files into a fresh directory.
pub fn functions_dir(functions: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (stem, source) in functions {
        std::fs::write(dir.path().join(format!("{}.wat", stem)), source).unwrap();
    }
    dir
}

/// Configuration suitable for tests: ephemeral port, small allocation.
pub fn test_config(mode: GatewayMode, functions: &TempDir) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.mode = mode;
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.registry.functions_dir = Some(functions.path().display().to_string());
    config.cluster.localities = 2;
    config.cluster.compute_slots = 4;
    config.sandbox.alloc_size = 32 * 1024 * 1024;
    config.timeouts.connection_secs = 10;
    config
}

/// A gateway running in the background of the current test runtime.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub connections: ConnectionTracker,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), ListenerError>>,
    _functions: Option<TempDir>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.task.await;
    }

    /// Poll until no connection is open, up to `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.connections.drain(timeout).await
    }
}

/// Start a gateway with real worker localities.
pub async fn start_gateway(config: GatewayConfig, functions: TempDir) -> TestGateway {
    let server = lifecycle::bootstrap(&config).unwrap();
    launch(server, &config, Some(functions)).await
}

/// Start a gateway whose localities are supplied by the test.
///
/// The registry still decides which paths are known to the bulk handler.
pub async fn start_with_localities(
    config: GatewayConfig,
    registry: FunctionRegistry,
    localities: Vec<Arc<dyn Locality>>,
) -> TestGateway {
    let set = LocalitySet::new(localities).unwrap();
    let server = GatewayServer::new(&config, Arc::new(registry), set);
    launch(server, &config, None).await
}

async fn launch(server: GatewayServer, config: &GatewayConfig, functions: Option<TempDir>) -> TestGateway {
    let shutdown = Shutdown::new();
    let running = lifecycle::serve(server, &config.listener, &shutdown).await.unwrap();
    TestGateway {
        addr: running.local_addr,
        connections: running.connections,
        shutdown,
        task: running.task,
        _functions: functions,
    }
}

/// Registry with the given paths bound to a trivial module.
pub fn registry_with(paths: &[&str]) -> FunctionRegistry {
    let engine = wasmtime::Engine::default();
    FunctionRegistry::from_sources(&engine, paths.iter().map(|p| (p.to_string(), "(module)"))).unwrap()
}

/// A response read off a raw socket.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: Vec<(String, String)>,
    /// Body with chunked framing removed.
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Send one HTTP/1.1 request, writing the body `chunk` bytes at a time, and
/// read until the server closes the connection.
pub async fn send_raw(addr: SocketAddr, method: &str, path: &str, body: &[u8], chunk: usize) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.set_nodelay(true).unwrap();

    let head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\n\r\n",
        method,
        path,
        addr,
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    // The server may answer and close without reading the body.
    for piece in body.chunks(chunk.max(1)) {
        if stream.write_all(piece).await.is_err() {
            break;
        }
    }
    let _ = stream.flush().await;

    let raw = read_until_closed(&mut stream).await;
    parse_response(&raw)
}

/// Read everything the peer sends until it closes; a reset also ends the read.
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
    raw
}

pub fn parse_response(raw: &[u8]) -> RawResponse {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head terminator");
    let head = std::str::from_utf8(&raw[..split]).unwrap();
    let rest = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let status = status_line.split(' ').nth(1).unwrap().parse().unwrap();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let chunked = headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.eq_ignore_ascii_case("chunked"));
    let body = if chunked { decode_chunked(rest) } else { rest.to_vec() };

    RawResponse { status, headers, body }
}

/// Strip `Transfer-Encoding: chunked` framing.
pub fn decode_chunked(mut data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = data.windows(2).position(|w| w == b"\r\n") else {
            break;
        };
        let size_field = std::str::from_utf8(&data[..line_end]).unwrap();
        let size_hex = size_field.split(';').next().unwrap().trim();
        let size = usize::from_str_radix(size_hex, 16).unwrap();
        data = &data[line_end + 2..];
        if size == 0 {
            break;
        }
        body.extend_from_slice(&data[..size]);
        data = &data[size + 2..];
    }
    body
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Echoes bulk payloads and records every call.
#[derive(Debug)]
pub struct RecordingLocality {
    id: LocalityId,
    pub calls: Arc<Mutex<Vec<(LocalityId, String)>>>,
}

impl RecordingLocality {
    pub fn new(id: u32, calls: Arc<Mutex<Vec<(LocalityId, String)>>>) -> Self {
        Self {
            id: LocalityId::new(id),
            calls,
        }
    }
}

#[async_trait]
impl Locality for RecordingLocality {
    fn id(&self) -> LocalityId {
        self.id
    }

    async fn invoke(&self, path: &str, payload: Bytes) -> Result<Bytes, InvocationError> {
        self.calls.lock().unwrap().push((self.id, path.to_string()));
        Ok(payload)
    }

    async fn invoke_streaming(
        &self,
        path: String,
        mut input: ByteReceiver,
        mut output: ByteSender,
    ) -> Result<(), InvocationError> {
        self.calls.lock().unwrap().push((self.id, path));
        loop {
            let chunk = input.recv_chunk(4096).await;
            if chunk.is_empty() {
                break;
            }
            let _ = output.push(chunk);
        }
        let _ = output.close();
        Ok(())
    }
}

/// Never finishes an invocation. Records when the pending call is dropped.
#[derive(Debug, Default)]
pub struct StalledLocality {
    pub started: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Locality for StalledLocality {
    fn id(&self) -> LocalityId {
        LocalityId::new(0)
    }

    async fn invoke(&self, _path: &str, _payload: Bytes) -> Result<Bytes, InvocationError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _flag = DropFlag(Arc::clone(&self.dropped));
        std::future::pending().await
    }

    async fn invoke_streaming(
        &self,
        _path: String,
        _input: ByteReceiver,
        _output: ByteSender,
    ) -> Result<(), InvocationError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _flag = DropFlag(Arc::clone(&self.dropped));
        std::future::pending().await
    }
}

/// Poll `condition` every 20 ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
