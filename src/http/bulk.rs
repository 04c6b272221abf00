//! Bulk connection handler: whole body in, whole output out.
//!
//! ```text
//! ReadingHeader ──non-POST──────────────▶ WritingResponse (400)
//!       │        ──unknown path─────────▶ WritingResponse (404, body never read)
//!       ▼
//! ReadingBody   ──over alloc size───────▶ WritingResponse (413)
//!       ▼
//! Dispatching   ──invocation error──────▶ WritingResponse (404 + cause)
//!       ▼
//! WritingResponse (200, application/octet-stream) ──▶ Closed
//! ```
//!
//! A transport error while reading the body goes straight to Closed: no
//! response is written and the socket is dropped.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Extension, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::config::GatewayMode;
use crate::http::response::GatewayError;
use crate::http::server::GatewayState;
use crate::net::{ConnectionContext, Phase};
use crate::observability::metrics;

pub async fn handle(
    State(state): State<GatewayState>,
    Extension(conn): Extension<ConnectionContext>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let response = match serve(&state, &conn, request).await {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            output,
        )
            .into_response(),
        Err(GatewayError::Transport(cause)) => {
            tracing::debug!(
                connection_id = %conn.id,
                phase = %Phase::Closed,
                error = %cause,
                "Transport error, closing without response"
            );
            return GatewayError::Transport(cause).into_response();
        }
        Err(error) => {
            match &error {
                GatewayError::InvocationFailed(cause) => tracing::warn!(
                    connection_id = %conn.id,
                    locality = %conn.locality.id(),
                    error = %cause,
                    "Invocation failed"
                ),
                other => tracing::debug!(connection_id = %conn.id, error = %other, "Request rejected"),
            }
            error.into_response()
        }
    };

    tracing::debug!(
        connection_id = %conn.id,
        phase = %Phase::WritingResponse,
        status = response.status().as_u16(),
        "Writing response"
    );
    metrics::record_request(GatewayMode::Bulk, response.status().as_u16(), started);
    response
}

async fn serve(
    state: &GatewayState,
    conn: &ConnectionContext,
    request: Request,
) -> Result<Bytes, GatewayError> {
    tracing::trace!(
        connection_id = %conn.id,
        phase = %Phase::ReadingHeader,
        method = %request.method(),
        target = %request.uri(),
        "Request head parsed"
    );
    if request.method() != Method::POST {
        return Err(GatewayError::BadRequest);
    }
    let path = request.uri().path().to_string();
    // Checked before the body is read; no instance is created for unknown paths.
    if !state.registry.contains(&path) {
        return Err(GatewayError::FunctionNotFound);
    }

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let read_started = Instant::now();
    let payload = read_body(request.into_body(), declared, state.max_payload).await?;
    tracing::debug!(
        connection_id = %conn.id,
        phase = %Phase::ReadingBody,
        bytes = payload.len(),
        elapsed_us = read_started.elapsed().as_micros() as u64,
        "Body read"
    );

    let dispatch_started = Instant::now();
    let output = conn.locality.invoke(&path, payload).await?;
    tracing::debug!(
        connection_id = %conn.id,
        phase = %Phase::Dispatching,
        locality = %conn.locality.id(),
        function = %path,
        bytes = output.len(),
        elapsed_us = dispatch_started.elapsed().as_micros() as u64,
        "Invocation returned"
    );
    Ok(output)
}

/// Most memory reserved from a declared length before any body byte arrives.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Buffer the whole body, refusing to grow past `limit`.
async fn read_body(body: Body, declared: Option<u64>, limit: usize) -> Result<Bytes, GatewayError> {
    if let Some(len) = declared {
        if len > limit as u64 {
            return Err(GatewayError::PayloadTooLarge { len, limit });
        }
    }

    let mut buffer = body_buffer(declared);
    let mut frames = body.into_data_stream();
    while let Some(frame) = frames.next().await {
        let data = frame.map_err(|e| GatewayError::Transport(e.to_string()))?;
        if buffer.len() + data.len() > limit {
            return Err(GatewayError::PayloadTooLarge {
                len: (buffer.len() + data.len()) as u64,
                limit,
            });
        }
        buffer.extend_from_slice(&data);
    }
    Ok(buffer.freeze())
}

/// The declared length is client-controlled; the buffer grows as data arrives.
fn body_buffer(declared: Option<u64>) -> BytesMut {
    let reserve = declared.map_or(0, |len| len.min(INITIAL_BODY_CAPACITY as u64) as usize);
    BytesMut::with_capacity(reserve)
}
