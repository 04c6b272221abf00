//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (with assigned locality)
//!     → server.rs (hyper HTTP/1.1, keep-alive off, Axum router, middleware)
//!     → bulk.rs      (buffer body → invoke → full response)
//!       or streaming.rs (commit head → pump input / dispatch / pump output)
//!     → response.rs (error → status + text/plain body)
//!     → Connection: close
//! ```

pub mod bulk;
pub mod response;
pub mod server;
pub mod streaming;

pub use response::GatewayError;
pub use server::{GatewayServer, GatewayState};
