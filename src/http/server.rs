//! HTTP server setup and the accept loop.
//!
//! # Responsibilities
//! - Build the Axum router for the configured mode
//! - Wire up middleware (tracing, request ID, `Connection: close`)
//! - Accept connections, assign each one a locality, serve it under a deadline
//! - Stop accepting on shutdown and drain in-flight connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Request};
use axum::routing::{any, MethodRouter};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::cluster::LocalitySet;
use crate::config::{GatewayConfig, GatewayMode, StreamingConfig};
use crate::http::response::Teardown;
use crate::http::{bulk, streaming};
use crate::net::{
    guard, ConnectionContext, ConnectionPermit, ConnectionTracker, Deadline, Listener,
    ListenerError, Phase,
};
use crate::observability::metrics;
use crate::registry::FunctionRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<FunctionRegistry>,
    /// Largest bulk body accepted, equal to the guest allocation size.
    pub max_payload: usize,
    pub streaming: StreamingConfig,
}

/// The gateway: router, locality set and connection bookkeeping.
pub struct GatewayServer {
    router: Router,
    mode: GatewayMode,
    localities: Arc<LocalitySet>,
    tracker: ConnectionTracker,
    connection_budget: Duration,
}

impl GatewayServer {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<FunctionRegistry>,
        localities: LocalitySet,
    ) -> Self {
        let state = GatewayState {
            registry,
            max_payload: config.sandbox.alloc_size as usize,
            streaming: config.streaming.clone(),
        };

        Self {
            router: Self::build_router(config.mode, state),
            mode: config.mode,
            localities: Arc::new(localities),
            tracker: ConnectionTracker::new(),
            connection_budget: Duration::from_secs(config.timeouts.connection_secs),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Every target is routed to the mode's handler; method checks happen in
    /// the handler so a wrong method is a 400, not a 405.
    pub fn build_router(mode: GatewayMode, state: GatewayState) -> Router {
        let handler: MethodRouter<GatewayState> = match mode {
            GatewayMode::Bulk => any(bulk::handle),
            GatewayMode::Streaming => any(streaming::handle),
        };

        Router::new()
            .route("/", handler.clone())
            .route("/{*path}", handler)
            .with_state(state)
            .layer(SetResponseHeaderLayer::overriding(
                header::CONNECTION,
                HeaderValue::from_static("close"),
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Handle on the active connection count.
    pub fn connections(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            mode = %self.mode,
            localities = self.localities.len(),
            "Gateway accepting connections"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Accept(e)) => {
                        // Usually descriptor exhaustion; back off instead of spinning.
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        let remaining = self.tracker.active_count();
        if remaining > 0 {
            tracing::info!(connections = remaining, "Draining connections");
        }
        if !self.tracker.drain(self.connection_budget).await {
            tracing::warn!(
                connections = self.tracker.active_count(),
                "Drain timed out, abandoning connections"
            );
        }
        tracing::info!("Gateway stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let guard_handle = self.tracker.track();
        let context = ConnectionContext {
            id: guard_handle.id(),
            peer,
            locality: self.localities.next(),
        };
        let span = tracing::debug_span!(
            "connection",
            id = %context.id,
            peer = %peer,
            locality = %context.locality.id()
        );
        let router = self.router.clone();
        let budget = self.connection_budget;

        tokio::spawn(
            async move {
                let _permit = permit;
                let _tracked = guard_handle;
                match guard(budget, serve_connection(stream, router, context)).await {
                    Deadline::Completed(Ok(())) => {
                        tracing::trace!(phase = %Phase::Closed, "Connection finished");
                    }
                    Deadline::Completed(Err(e)) => {
                        tracing::debug!(phase = %Phase::Closed, error = %e, "Transport error");
                    }
                    Deadline::Expired => {
                        tracing::warn!(
                            budget_secs = budget.as_secs(),
                            "Connection taking too long, closing"
                        );
                        metrics::record_deadline_expired();
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Serve exactly one request on `stream`, then close.
///
/// A response marked with [`Teardown`] becomes a service error, so hyper
/// drops the socket without writing anything.
async fn serve_connection(
    stream: TcpStream,
    router: Router,
    context: ConnectionContext,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(context.clone());
        let response = router.clone().oneshot(request);
        async move {
            let response = match response.await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            match response.extensions().get::<Teardown>() {
                Some(teardown) => Err(teardown.clone()),
                None => Ok(response),
            }
        }
    });

    http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service)
        .await
}
