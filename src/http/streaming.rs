//! Streaming connection handler.
//!
//! Once the method checks out, the response head (200, no length) is
//! committed immediately and three activities share the connection:
//!
//! ```text
//! input pump:   request body ──split to read_buffer_size──▶ input channel ──close at end of body
//! dispatch:     locality.invoke_streaming(path, input, output), launched on first body poll
//! output pump:  output channel ──up to write_buffer_size──▶ response body ──end on end-of-data
//! ```
//!
//! An unknown path cannot be reported once the head is out; the worker
//! closes the output channel and the client sees an empty body.
//!
//! Everything spawned here is owned by the response body. When the
//! connection is torn down (deadline, reset) the body is dropped and the
//! pumps and the dispatch are aborted with it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Extension, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::cluster::{channel, channel_with_flush_threshold, ByteReceiver, ByteSender, Locality};
use crate::config::GatewayMode;
use crate::http::response::GatewayError;
use crate::http::server::GatewayState;
use crate::net::{ConnectionContext, ConnectionId, Phase};
use crate::observability::metrics;

pub async fn handle(
    State(state): State<GatewayState>,
    Extension(conn): Extension<ConnectionContext>,
    request: Request,
) -> Response {
    let started = Instant::now();
    tracing::trace!(
        connection_id = %conn.id,
        phase = %Phase::ReadingHeader,
        method = %request.method(),
        target = %request.uri(),
        "Request head parsed"
    );

    if request.method() != Method::POST {
        metrics::record_request(GatewayMode::Streaming, 400, started);
        return GatewayError::BadRequest.into_response();
    }

    let path = request.uri().path().to_string();
    let (input_tx, input_rx) = channel();
    let (output_tx, output_rx) = channel_with_flush_threshold(state.streaming.write_buffer_size);

    let input = TaskGuard(tokio::spawn(pump_input(
        request.into_body(),
        input_tx,
        state.streaming.read_buffer_size,
        conn.id,
    )));

    let pump = OutputPump {
        output: output_rx,
        pending: Some(Dispatch {
            locality: Arc::clone(&conn.locality),
            path,
            input: input_rx,
            output: output_tx,
            conn: conn.id,
        }),
        dispatch: None,
        _input: input,
        write_buffer_size: state.streaming.write_buffer_size,
        conn: conn.id,
    };

    tracing::debug!(
        connection_id = %conn.id,
        phase = %Phase::Streaming,
        locality = %conn.locality.id(),
        "Response head committed"
    );
    metrics::record_request(GatewayMode::Streaming, 200, started);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(pump.into_stream()),
    )
        .into_response()
}

/// Forward the request body into the input channel.
///
/// The channel is closed only after the transport reports the end of the
/// body. A body error or a consumer that stopped reading ends the pump
/// early; dropping the sender then releases the guest.
async fn pump_input(body: Body, mut input: ByteSender, read_buffer_size: usize, conn: ConnectionId) {
    let started = Instant::now();
    let mut forwarded = 0usize;
    let mut frames = body.into_data_stream();

    while let Some(frame) = frames.next().await {
        let mut data = match frame {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(connection_id = %conn, error = %e, "Request body read failed");
                return;
            }
        };
        while !data.is_empty() {
            let piece = data.split_to(read_buffer_size.min(data.len()));
            forwarded += piece.len();
            if input.push(piece).is_err() {
                tracing::debug!(connection_id = %conn, forwarded, "Function stopped consuming input");
                return;
            }
        }
    }

    if input.close().is_err() {
        tracing::debug!(connection_id = %conn, "Function finished before input closed");
    }
    tracing::debug!(
        connection_id = %conn,
        bytes = forwarded,
        elapsed_us = started.elapsed().as_micros() as u64,
        "Input closed"
    );
}

/// A streaming invocation not yet launched.
struct Dispatch {
    locality: Arc<dyn Locality>,
    path: String,
    input: ByteReceiver,
    output: ByteSender,
    conn: ConnectionId,
}

impl Dispatch {
    async fn run(self) {
        let Dispatch {
            locality,
            path,
            input,
            output,
            conn,
        } = self;
        match locality.invoke_streaming(path.clone(), input, output).await {
            Ok(()) => tracing::debug!(connection_id = %conn, function = %path, "Streaming invocation finished"),
            Err(e) if e.is_not_found() => {
                tracing::info!(connection_id = %conn, function = %path, "Function not found, ending body")
            }
            Err(e) => tracing::warn!(
                connection_id = %conn,
                locality = %locality.id(),
                function = %path,
                error = %e,
                "Streaming invocation failed"
            ),
        }
    }
}

/// Aborts the task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Response body state.
struct OutputPump {
    output: ByteReceiver,
    pending: Option<Dispatch>,
    dispatch: Option<TaskGuard>,
    _input: TaskGuard,
    write_buffer_size: usize,
    conn: ConnectionId,
}

impl OutputPump {
    fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, |mut pump| async move {
            if let Some(dispatch) = pump.pending.take() {
                pump.dispatch = Some(TaskGuard(tokio::spawn(dispatch.run())));
            }

            let chunk = pump.output.recv_chunk(pump.write_buffer_size).await;
            if chunk.is_empty() {
                pump.finish().await;
                return None;
            }
            Some((Ok(chunk), pump))
        })
    }

    /// End-of-data seen: the invocation is returning, let it report before
    /// the connection closes.
    async fn finish(&mut self) {
        if let Some(task) = self.dispatch.as_mut() {
            let _ = (&mut task.0).await;
        }
        tracing::debug!(connection_id = %self.conn, phase = %Phase::Closed, "Output drained");
    }
}
