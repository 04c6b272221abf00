//! In-process worker node.
//!
//! Each node owns a bounded number of compute slots. An invocation takes a
//! slot, then runs on the runtime's blocking pool so a guest that blocks on
//! its input channel never stalls the transport threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cluster::channel::{ByteReceiver, ByteSender};
use crate::cluster::locality::{InvocationError, Locality, LocalityId};
use crate::observability::metrics;
use crate::registry::FunctionRegistry;
use crate::sandbox::Sandbox;

/// A locality hosted by this process.
#[derive(Debug)]
pub struct WorkerNode {
    id: LocalityId,
    registry: Arc<FunctionRegistry>,
    sandbox: Sandbox,
    slots: Arc<Semaphore>,
    in_flight: AtomicU64,
    completed: AtomicU64,
}

impl WorkerNode {
    pub fn new(
        id: LocalityId,
        registry: Arc<FunctionRegistry>,
        sandbox: Sandbox,
        compute_slots: usize,
    ) -> Self {
        Self {
            id,
            registry,
            sandbox,
            slots: Arc::new(Semaphore::new(compute_slots.max(1))),
            in_flight: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Invocations currently holding or waiting for a compute slot.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Invocations that have finished, successfully or not.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, InvocationError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| InvocationError::WorkerLost {
                locality: self.id,
                reason: "compute pool closed".to_string(),
            })
    }

    fn lost(&self, error: tokio::task::JoinError) -> InvocationError {
        InvocationError::WorkerLost {
            locality: self.id,
            reason: error.to_string(),
        }
    }

    fn finish<T>(&self, started: Instant, result: &Result<T, InvocationError>) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_invocation(self.id, outcome, started);
    }
}

#[async_trait]
impl Locality for WorkerNode {
    fn id(&self) -> LocalityId {
        self.id
    }

    async fn invoke(&self, path: &str, payload: Bytes) -> Result<Bytes, InvocationError> {
        let started = Instant::now();
        let _in_flight = InFlight::enter(&self.in_flight);

        let result = async {
            let module = self
                .registry
                .resolve(path)
                .cloned()
                .ok_or_else(|| InvocationError::FunctionNotFound(path.to_string()))?;
            let permit = self.acquire_slot().await?;
            let sandbox = self.sandbox.clone();

            let output = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                sandbox.invoke_bulk(&module, &payload)
            })
            .await
            .map_err(|e| self.lost(e))??;
            Ok::<_, InvocationError>(Bytes::from(output))
        }
        .await;

        tracing::debug!(
            locality = %self.id,
            path = %path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Bulk invocation finished"
        );
        self.finish(started, &result);
        result
    }

    async fn invoke_streaming(
        &self,
        path: String,
        input: ByteReceiver,
        output: ByteSender,
    ) -> Result<(), InvocationError> {
        let started = Instant::now();
        let _in_flight = InFlight::enter(&self.in_flight);

        let result = async {
            let Some(module) = self.registry.resolve(&path).cloned() else {
                // Dropping the sender ends the client's body.
                drop(output);
                return Err(InvocationError::FunctionNotFound(path.clone()));
            };
            let permit = self.acquire_slot().await?;
            let sandbox = self.sandbox.clone();

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                sandbox.invoke_streaming(&module, input, output)
            })
            .await
            .map_err(|e| self.lost(e))??;
            Ok::<_, InvocationError>(())
        }
        .await;

        tracing::debug!(
            locality = %self.id,
            path = %path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Streaming invocation finished"
        );
        self.finish(started, &result);
        result
    }
}

/// Counts an invocation as in flight until dropped, including when the
/// caller abandons it mid-way.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::channel::channel;
    use crate::config::SandboxConfig;
    use wasmtime::Engine;

    const BULK_ECHO: &str = include_str!("../../functions/bulk/echo.wat");
    const STREAM_ECHO: &str = include_str!("../../functions/streaming/echo.wat");

    fn node(sources: &[(&str, &str)]) -> WorkerNode {
        let engine = Engine::default();
        let registry = FunctionRegistry::from_sources(&engine, sources.iter().copied()).unwrap();
        let sandbox = Sandbox::with_engine(
            engine,
            &SandboxConfig {
                alloc_size: 1024 * 1024,
            },
        );
        WorkerNode::new(LocalityId::new(0), Arc::new(registry), sandbox, 2)
    }

    #[tokio::test]
    async fn bulk_echo_round_trip() {
        let node = node(&[("/echo", BULK_ECHO)]);
        let output = node.invoke("/echo", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(output, Bytes::from_static(b"hello"));
        assert_eq!(node.in_flight(), 0);
        assert_eq!(node.completed(), 1);
    }

    #[tokio::test]
    async fn bulk_unknown_path_is_not_found() {
        let node = node(&[("/echo", BULK_ECHO)]);
        let err = node.invoke("/missing", Bytes::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn streaming_unknown_path_closes_output() {
        let node = node(&[]);
        let (_input_tx, input_rx) = channel();
        let (output_tx, mut output_rx) = channel();

        let err = node
            .invoke_streaming("/missing".into(), input_rx, output_tx)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(output_rx.recv_chunk(16).await.is_empty());
    }

    #[tokio::test]
    async fn streaming_echo_through_worker() {
        let node = node(&[("/echo", STREAM_ECHO)]);
        let (mut input_tx, input_rx) = channel();
        let (output_tx, mut output_rx) = channel();

        input_tx.push(Bytes::from_static(b"abc")).unwrap();
        input_tx.close().unwrap();
        node.invoke_streaming("/echo".into(), input_rx, output_tx)
            .await
            .unwrap();

        let mut received = Vec::new();
        loop {
            let chunk = output_rx.recv_chunk(2).await;
            if chunk.is_empty() {
                break;
            }
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"abc");
    }
}
