//! Error responses.
//!
//! # Responsibilities
//! - Map per-connection failures to HTTP status codes
//! - Render error bodies as `text/plain`
//!
//! # Status mapping
//! ```text
//! BadRequest          wrong method            400
//! FunctionNotFound    unknown path            404
//! InvocationFailed    sandbox protocol error  404 with diagnostic text
//! PayloadTooLarge     body over alloc size    413
//! Transport           client body broken      none, the connection is dropped
//! ```

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::cluster::InvocationError;

pub const BAD_METHOD_BODY: &str = "Invalid request-method.";
pub const NOT_FOUND_BODY: &str = "function not found\r\n";

/// Anything that ends a request with an error response.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request method must be POST")]
    BadRequest,

    #[error("function not found")]
    FunctionNotFound,

    #[error("request body of {len} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { len: u64, limit: usize },

    /// The transport failed mid-request. Nothing is written back.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("function failed: {0}")]
    InvocationFailed(InvocationError),
}

impl GatewayError {
    /// Status written to the client, `None` when the connection is torn down instead.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::BadRequest => Some(StatusCode::BAD_REQUEST),
            GatewayError::FunctionNotFound | GatewayError::InvocationFailed(_) => {
                Some(StatusCode::NOT_FOUND)
            }
            GatewayError::PayloadTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            GatewayError::Transport(_) => None,
        }
    }

    fn body(&self) -> String {
        match self {
            GatewayError::BadRequest => BAD_METHOD_BODY.to_string(),
            GatewayError::FunctionNotFound => NOT_FOUND_BODY.to_string(),
            other => format!("{}\r\n", other),
        }
    }
}

impl From<InvocationError> for GatewayError {
    fn from(error: InvocationError) -> Self {
        if error.is_not_found() {
            GatewayError::FunctionNotFound
        } else {
            GatewayError::InvocationFailed(error)
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self.status() {
            Some(status) => (
                status,
                [(header::CONTENT_TYPE, "text/plain")],
                self.body(),
            )
                .into_response(),
            None => Teardown(self.to_string()).into_response(),
        }
    }
}

/// Response extension telling the connection layer to close the socket
/// without writing the response it is attached to.
#[derive(Debug, Clone, Error)]
#[error("connection torn down: {0}")]
pub struct Teardown(pub String);

impl IntoResponse for Teardown {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::empty());
        response.extensions_mut().insert(self);
        response
    }
}
